use actix_web::dev::ServerHandle;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::ClientSecrets;
use crate::credentials::{Authorizer, CredentialToken};
use crate::utilities::open_in_browser;

pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

/// Installed-app OAuth client: builds consent URLs and talks to the token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    secrets: ClientSecrets,
    auth_uri: String,
    token_uri: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    /// Refresh responses usually omit the refresh token, so the previous one is kept.
    fn into_token(self, previous_refresh: Option<String>) -> CredentialToken {
        CredentialToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: self.scope,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        }
    }
}

impl OAuthClient {
    pub fn new(secrets: ClientSecrets) -> Self {
        Self {
            secrets,
            auth_uri: AUTH_URI.to_string(),
            token_uri: TOKEN_URI.to_string(),
            http: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    pub fn with_endpoints(mut self, auth_uri: &str, token_uri: &str) -> Self {
        self.auth_uri = auth_uri.to_string();
        self.token_uri = token_uri.to_string();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.secrets.project_id
    }

    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let url = Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", UPLOAD_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .with_context(|| format!("invalid authorization endpoint {}", self.auth_uri))?;
        Ok(url)
    }

    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<CredentialToken> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", &self.secrets.client_id),
                ("client_secret", &self.secrets.client_secret),
            ])
            .await?;
        Ok(response.into_token(None))
    }

    pub async fn refresh(&self, token: &CredentialToken) -> Result<CredentialToken> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow!("token has no refresh token"))?;
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.secrets.client_id),
                ("client_secret", &self.secrets.client_secret),
            ])
            .await?;
        Ok(response.into_token(token.refresh_token.clone()))
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.token_uri)
            .form(form)
            .send()
            .await
            .context("token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("token endpoint returned {}: {}", status, body);
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

struct CallbackContext {
    expected_state: String,
    tx: mpsc::Sender<CallbackParams>,
}

/// Receives the OAuth redirect on `/`. Requests that do not carry this flow's
/// `state` together with a `code` or `error` are answered with 400 and dropped.
#[get("/")]
async fn oauth_callback(
    query: web::Query<CallbackParams>,
    ctx: web::Data<CallbackContext>,
) -> impl Responder {
    let params = query.into_inner();
    if params.state.as_deref() != Some(ctx.expected_state.as_str()) {
        debug!("Ignoring OAuth callback with a foreign state");
        return HttpResponse::BadRequest()
            .content_type("text/plain; charset=utf-8")
            .body("Unexpected authorization response.");
    }
    if params.code.is_none() && params.error.is_none() {
        return HttpResponse::BadRequest()
            .content_type("text/plain; charset=utf-8")
            .body("Authorization response is missing the code.");
    }

    let body = if params.error.is_some() {
        "Authorization was not granted. You may close this window."
    } else {
        "The authentication flow has completed. You may close this window."
    };
    // Only the first redirect matters.
    let _ = ctx.tx.try_send(params);
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(body)
}

/// Short-lived loopback server that waits for a single OAuth redirect.
pub struct CallbackServer {
    addr: SocketAddr,
    rx: mpsc::Receiver<CallbackParams>,
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
}

impl CallbackServer {
    /// Binds an ephemeral port on 127.0.0.1 and starts serving. Only redirects
    /// carrying `expected_state` are delivered to [`CallbackServer::wait`].
    pub fn start(expected_state: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<CallbackParams>(1);
        let ctx = web::Data::new(CallbackContext {
            expected_state: expected_state.to_string(),
            tx,
        });
        let server = HttpServer::new(move || {
            App::new()
                .app_data(ctx.clone())
                .service(oauth_callback)
        })
        .workers(1)
        .shutdown_timeout(5)
        .disable_signals()
        .bind(("127.0.0.1", 0))?;

        let addr = server
            .addrs()
            .first()
            .copied()
            .context("callback server did not bind")?;
        let running = server.run();
        let handle = running.handle();
        let task = tokio::spawn(running);
        debug!("OAuth callback server listening on {}", addr);

        Ok(Self {
            addr,
            rx,
            handle,
            task,
        })
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.addr.port())
    }

    /// Waits up to `timeout` for the redirect, then shuts the server down.
    pub async fn wait(mut self, timeout: Duration) -> Result<CallbackParams> {
        let received = tokio::time::timeout(timeout, self.rx.recv()).await;
        self.handle.stop(true).await;
        if let Err(e) = self.task.await {
            warn!("OAuth callback server task failed: {}", e);
        }

        match received {
            Ok(Some(params)) => Ok(params),
            Ok(None) => bail!("OAuth callback server closed before authorization completed"),
            Err(_) => bail!("timed out after {:?} waiting for authorization", timeout),
        }
    }
}

/// Runs the consent flow in the user's browser and blocks until the redirect
/// arrives or `timeout` passes.
pub struct BrowserAuthorizer {
    timeout: Duration,
}

impl BrowserAuthorizer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Authorizer for BrowserAuthorizer {
    async fn authorize(&self, oauth: &OAuthClient) -> Result<CredentialToken> {
        let state = random_state();
        let server = CallbackServer::start(&state)?;
        let redirect_uri = server.redirect_uri();
        let url = oauth.authorization_url(&redirect_uri, &state)?;

        println!("Please visit this URL to authorize this application: {}", url);
        if let Err(e) = open_in_browser(url.as_str()) {
            warn!("Could not open a browser: {}", e);
        }

        let params = server.wait(self.timeout).await?;
        let code = check_callback(params, &state)?;
        let token = oauth.exchange_code(&code, &redirect_uri).await?;
        info!("Authorized for project {}", oauth.project_id());
        Ok(token)
    }
}

fn random_state() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn check_callback(params: CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = params.error {
        bail!("authorization denied: {}", error);
    }
    ensure!(
        params.state.as_deref() == Some(expected_state),
        "authorization response carried an unexpected state"
    );
    params
        .code
        .ok_or_else(|| anyhow!("authorization response is missing the code"))
}
