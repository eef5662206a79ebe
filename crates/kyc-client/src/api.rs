//! HTTP client for the KYC backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::interceptor::{AuthInterceptor, ClearCredentials};
use crate::session::{AuthTokens, SessionContext, TokenStoreError};

/// Paths under this prefix carry the bearer token and trigger the
/// unauthorized hook on 401.
const KYC_PREFIX: &str = "/kyc/";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("unauthorized: {path}")]
    Unauthorized { path: String },
    #[error("server rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
    Other,
}

impl std::str::FromStr for Gender {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            _ => Err(ClientError::Invalid(format!("unknown gender '{s}'"))),
        }
    }
}

/// Account registration form.
#[derive(Clone, Serialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub whatsapp: String,
    pub gender: Gender,
    pub address: String,
    pub country: String,
}

impl SignupRequest {
    /// Every field is required; the email must at least look like one.
    pub fn validate(&self) -> Result<(), ClientError> {
        let fields = [
            ("username", &self.username),
            ("email", &self.email),
            ("password", &self.password),
            ("full_name", &self.full_name),
            ("whatsapp", &self.whatsapp),
            ("address", &self.address),
            ("country", &self.country),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ClientError::Invalid(format!("{name} is required")));
        }
        validate_email(&self.email)
    }
}

#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.password.is_empty() {
            return Err(ClientError::Invalid("password is required".to_string()));
        }
        validate_email(&self.email)
    }
}

fn validate_email(email: &str) -> Result<(), ClientError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ClientError::Invalid(format!("invalid email '{email}'"))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: serde_json::Value,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

/// Backend acknowledgement of a selfie upload.
#[derive(Debug, Clone, Deserialize)]
pub struct KycSubmission {
    #[serde(default)]
    pub selfie_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Anything that can take a JPEG selfie and hand it to the verification backend.
#[async_trait]
pub trait SelfieSubmitter: Send + Sync {
    async fn submit_selfie(&self, jpeg: Vec<u8>) -> Result<KycSubmission, ClientError>;
}

/// REST client bound to one backend and one user session.
pub struct ApiClient {
    client: Client,
    base_url: String,
    ctx: Arc<SessionContext>,
    interceptor: Arc<dyn AuthInterceptor>,
}

impl ApiClient {
    /// Client with the default [`ClearCredentials`] 401 hook.
    pub fn new(
        base_url: &str,
        ctx: Arc<SessionContext>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ctx,
            interceptor: Arc::new(ClearCredentials),
        })
    }

    /// Replace the 401 hook.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn AuthInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Register a new account. Returns the backend's payload as-is: JSON when
    /// the body parses as JSON, a string otherwise, `Null` when empty.
    pub async fn signup(&self, req: &SignupRequest) -> Result<serde_json::Value, ClientError> {
        req.validate()?;
        tracing::info!(username = %req.username, email = %req.email, "signup requested");
        let path = "/auth/signup/";
        let resp = self.request(path).json(req).send().await?;
        let body = self.check(path, resp).await?.text().await?;
        Ok(lenient_payload(body))
    }

    /// Log in and store the returned tokens in the session context.
    pub async fn login(&self, req: &LoginRequest) -> Result<LoginResponse, ClientError> {
        req.validate()?;
        tracing::info!(email = %req.email, "login requested");
        let path = "/auth/login/";
        let resp = self.request(path).json(req).send().await?;
        let login: LoginResponse = self.handle(path, resp).await?;

        if let Some(access) = &login.access {
            self.ctx.set_tokens(AuthTokens {
                access: access.clone(),
                refresh: login.refresh.clone().unwrap_or_default(),
            })?;
            tracing::info!(email = %req.email, "login succeeded, tokens stored");
        } else {
            tracing::warn!(email = %req.email, "login response carried no access token");
        }
        Ok(login)
    }

    /// Upload a JPEG selfie as multipart field `selfie`.
    pub async fn submit_selfie(&self, jpeg: Vec<u8>) -> Result<KycSubmission, ClientError> {
        let path = "/kyc/kyc/";
        let bytes = jpeg.len();
        let part = Part::bytes(jpeg)
            .file_name("selfie.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("selfie", part);

        tracing::info!(bytes, "submitting selfie");
        let resp = self.request(path).multipart(form).send().await?;
        let submission: KycSubmission = self.handle(path, resp).await?;
        tracing::info!(selfie_url = ?submission.selfie_url, "selfie accepted");
        Ok(submission)
    }

    fn request(&self, path: &str) -> RequestBuilder {
        let builder = self.client.post(format!("{}{}", self.base_url, path));
        if !path.starts_with(KYC_PREFIX) {
            return builder;
        }
        match self.ctx.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn handle<T: DeserializeOwned>(
        &self,
        path: &str,
        resp: Response,
    ) -> Result<T, ClientError> {
        Ok(self.check(path, resp).await?.json().await?)
    }

    /// Pass 2xx responses through; map everything else to a [`ClientError`].
    async fn check(&self, path: &str, resp: Response) -> Result<Response, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        tracing::error!(path, status = status.as_u16(), body = %body, "API error response");

        match status {
            StatusCode::UNAUTHORIZED => {
                if path.starts_with(KYC_PREFIX) {
                    self.interceptor.on_unauthorized(&self.ctx, path);
                }
                return Err(ClientError::Unauthorized {
                    path: path.to_string(),
                });
            }
            StatusCode::FORBIDDEN => tracing::error!("forbidden: you do not have permission"),
            StatusCode::NOT_FOUND => {
                tracing::error!("not found: the requested resource does not exist")
            }
            s if s.is_server_error() => tracing::error!("server error: please try again later"),
            _ => {}
        }

        Err(ClientError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn lenient_payload(body: String) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
}

#[async_trait]
impl SelfieSubmitter for ApiClient {
    async fn submit_selfie(&self, jpeg: Vec<u8>) -> Result<KycSubmission, ClientError> {
        ApiClient::submit_selfie(self, jpeg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn signup_request() -> SignupRequest {
        SignupRequest {
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "hunter2".to_string(),
            full_name: "Ada Lovelace".to_string(),
            whatsapp: "+44 20 0000 0000".to_string(),
            gender: Gender::Female,
            address: "12 St James's Square".to_string(),
            country: "UK".to_string(),
        }
    }

    fn client(server: &MockServer, ctx: Arc<SessionContext>) -> ApiClient {
        ApiClient::new(&server.uri(), ctx, Duration::from_secs(5)).unwrap()
    }

    fn logged_in() -> Arc<SessionContext> {
        let ctx = Arc::new(SessionContext::in_memory());
        ctx.set_tokens(AuthTokens {
            access: "acc-token".to_string(),
            refresh: "ref-token".to_string(),
        })
        .unwrap();
        ctx
    }

    #[test]
    fn test_signup_validation() {
        assert!(signup_request().validate().is_ok());

        let mut missing = signup_request();
        missing.country = "  ".to_string();
        assert!(matches!(missing.validate(), Err(ClientError::Invalid(m)) if m.contains("country")));

        let mut bad_email = signup_request();
        bad_email.email = "ada.example.com".to_string();
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_gender_parse() {
        assert_eq!("Female".parse::<Gender>().unwrap(), Gender::Female);
        assert!("robot".parse::<Gender>().is_err());
    }

    #[tokio::test]
    async fn test_signup_posts_form_without_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/signup/"))
            .and(body_json(json!({
                "username": "ada",
                "email": "ada@example.com",
                "password": "hunter2",
                "full_name": "Ada Lovelace",
                "whatsapp": "+44 20 0000 0000",
                "gender": "female",
                "address": "12 St James's Square",
                "country": "UK",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server, logged_in());
        let body = api.signup(&signup_request()).await.unwrap();
        assert_eq!(body["id"], 7);

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_signup_accepts_non_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/signup/"))
            .respond_with(ResponseTemplate::new(201).set_body_string("Account created"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/signup/"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let api = client(&server, Arc::new(SessionContext::in_memory()));
        let text = api.signup(&signup_request()).await.unwrap();
        assert_eq!(text, json!("Account created"));
        let empty = api.signup(&signup_request()).await.unwrap();
        assert_eq!(empty, serde_json::Value::Null);
    }

    #[test]
    fn test_lenient_payload() {
        assert_eq!(lenient_payload("{\"id\": 1}".to_string()), json!({"id": 1}));
        assert_eq!(lenient_payload("ok".to_string()), json!("ok"));
        assert_eq!(lenient_payload("  \n".to_string()), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_signup_error_body_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/signup/"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"email": ["already taken"]})),
            )
            .mount(&server)
            .await;

        let err = client(&server, Arc::new(SessionContext::in_memory()))
            .signup(&signup_request())
            .await
            .unwrap_err();
        match err {
            ClientError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("already taken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_stores_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login/"))
            .and(body_json(json!({"email": "ada@example.com", "password": "hunter2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access": "a1",
                "refresh": "r1",
                "user": {"id": "u-1", "email": "ada@example.com", "username": "ada"},
            })))
            .mount(&server)
            .await;

        let ctx = Arc::new(SessionContext::in_memory());
        let api = client(&server, Arc::clone(&ctx));
        let resp = api
            .login(&LoginRequest {
                email: "ada@example.com".to_string(),
                password: "hunter2".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(resp.user.unwrap().username, "ada");
        assert_eq!(
            ctx.tokens(),
            Some(AuthTokens {
                access: "a1".to_string(),
                refresh: "r1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_login_401_keeps_interceptor_quiet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let ctx = logged_in();
        let err = client(&server, Arc::clone(&ctx))
            .login(&LoginRequest {
                email: "ada@example.com".to_string(),
                password: "wrong".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized { .. }));
        // Only KYC endpoints invalidate the session
        assert!(ctx.is_authenticated());
    }

    #[tokio::test]
    async fn test_submit_selfie_multipart_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/kyc/kyc/"))
            .and(header("authorization", "Bearer acc-token"))
            .and(body_string_contains("name=\"selfie\""))
            .and(body_string_contains("filename=\"selfie.jpg\""))
            .and(body_string_contains("image/jpeg"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 3,
                "selfie_url": "https://cdn.example.com/selfie.jpg",
                "status": "pending",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server, logged_in());
        let submission = api.submit_selfie(b"fake-jpeg".to_vec()).await.unwrap();
        assert_eq!(
            submission.selfie_url.as_deref(),
            Some("https://cdn.example.com/selfie.jpg")
        );
        assert_eq!(submission.extra["status"], "pending");
    }

    #[tokio::test]
    async fn test_kyc_401_clears_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/kyc/kyc/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let ctx = logged_in();
        let err = client(&server, Arc::clone(&ctx))
            .submit_selfie(b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized { ref path } if path == "/kyc/kyc/"));
        assert!(!ctx.is_authenticated());
    }

    struct CountingInterceptor(AtomicUsize);

    impl AuthInterceptor for CountingInterceptor {
        fn on_unauthorized(&self, _ctx: &SessionContext, _path: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_custom_interceptor_replaces_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/kyc/kyc/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let ctx = logged_in();
        let counter = Arc::new(CountingInterceptor(AtomicUsize::new(0)));
        let api = client(&server, Arc::clone(&ctx)).with_interceptor(counter.clone());
        let _ = api.submit_selfie(b"x".to_vec()).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(ctx.is_authenticated());
    }

    #[tokio::test]
    async fn test_server_error_is_rejected_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/kyc/kyc/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, logged_in())
            .submit_selfie(b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 500, .. }));
    }
}
