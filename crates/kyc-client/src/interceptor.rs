use crate::session::SessionContext;

/// Hook invoked when the backend rejects a KYC request with 401.
///
/// Injected into [`crate::ApiClient`] so the caller decides what a dead
/// session means (clear tokens, prompt for login, ...).
pub trait AuthInterceptor: Send + Sync {
    fn on_unauthorized(&self, ctx: &SessionContext, path: &str);
}

/// Default hook: drop the stored credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClearCredentials;

impl AuthInterceptor for ClearCredentials {
    fn on_unauthorized(&self, ctx: &SessionContext, path: &str) {
        tracing::warn!(path, "unauthorized, clearing stored credentials");
        if let Err(e) = ctx.clear() {
            tracing::error!(error = %e, "failed to clear stored credentials");
        }
    }
}
