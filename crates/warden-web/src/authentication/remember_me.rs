//! Remember-me hooks

use std::fmt;

use warden_core::Authentication;

use crate::exchange::Exchange;

/// Notified of interactive login outcomes so persistent logins can be
/// issued or revoked
pub trait RememberMeServices: Send + Sync + fmt::Debug {
    /// A login was committed
    fn login_success(&self, exchange: &mut Exchange, authentication: &Authentication);

    /// A login was rejected
    fn login_fail(&self, exchange: &mut Exchange);
}

/// Does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRememberMeServices;

impl RememberMeServices for NullRememberMeServices {
    fn login_success(&self, _exchange: &mut Exchange, _authentication: &Authentication) {}

    fn login_fail(&self, _exchange: &mut Exchange) {}
}
