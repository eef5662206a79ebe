//! Client side of the KYC backend: account signup and login, bearer-token
//! session context, and the selfie upload consumed by the liveness flow.

pub mod api;
pub mod interceptor;
pub mod session;

pub use api::{
    ApiClient, ClientError, Gender, KycSubmission, LoginRequest, LoginResponse, SelfieSubmitter,
    SignupRequest, UserInfo,
};
pub use interceptor::{AuthInterceptor, ClearCredentials};
pub use session::{AuthTokens, SessionContext, TokenStore, TokenStoreError};
