use std::{
    fmt::Display,
    fs,
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use ureq::{
    http::{Response, StatusCode},
    Agent, Body,
};
use url::Url;

use crate::{
    config::Config,
    data::{Playlist, Session, Track, UserProfile},
    error::Error,
    session::{AuthBackend, AuthEvent, SessionCallback, SessionDispatcher, Subscription},
    util::default_ureq_agent_builder,
};

/// Typed client for the hosted backend: identity endpoints under `auth/v1`,
/// record queries under `rest/v1`, blob storage under `storage/v1`.  Keeps
/// the session it last obtained and rotates it ahead of expiry; all observed
/// session changes go out through the dispatcher.
pub struct Client {
    agent: Agent,
    base_url: String,
    anon_key: String,
    session: Mutex<Option<Session>>,
    dispatcher: SessionDispatcher,
}

impl Client {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let base_url = config.backend_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|err| Error::ConfigError(format!("invalid backend URL: {err}")))?;
        Ok(Self {
            agent: default_ureq_agent_builder(config.proxy().as_deref())
                .build()
                .into(),
            base_url,
            anon_key: config.anon_key.clone(),
            session: Mutex::new(config.session.clone()),
            dispatcher: SessionDispatcher::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|err| Error::ConfigError(format!("invalid backend URL: {err}")))
    }

    /// Bearer token for data-plane requests: the session's access token,
    /// rotated ahead of expiry, or the publishable key when signed out.
    fn bearer_token(&self) -> Result<String, Error> {
        let current = match self.session.lock().clone() {
            Some(session) => session,
            None => return Ok(self.anon_key.clone()),
        };
        if !current.is_expired() {
            return Ok(current.access_token);
        }
        log::info!("access token expired, refreshing the session");
        Ok(self.rotate_session(&current)?.access_token)
    }

    /// Trade `stale` for a fresh session.  The session lock is not held over
    /// the refresh call; the outcome is written back only while the held
    /// session is still the one that was rotated, so a sign-in or sign-out
    /// that happened in the meantime wins.
    fn rotate_session(&self, stale: &Session) -> Result<Session, Error> {
        match self.refresh_session(&stale.refresh_token) {
            Ok(rotated) => {
                let installed = Self::install_if_current(
                    &mut self.session.lock(),
                    stale,
                    Some(rotated.clone()),
                );
                if installed {
                    self.dispatcher
                        .emit(AuthEvent::TokenRefreshed, Some(&rotated));
                }
                Ok(rotated)
            }
            // A rate-limited refresh is not a verdict on the token.
            Err(Error::BackendError { status, message }) if status != 429 && status < 500 => {
                log::warn!("session refresh rejected ({status}): {message}");
                let dropped = Self::install_if_current(&mut self.session.lock(), stale, None);
                if dropped {
                    self.dispatcher.emit(AuthEvent::SignedOut, None);
                }
                Err(Error::SessionExpired)
            }
            Err(err) => Err(err),
        }
    }

    fn install_if_current(
        held: &mut Option<Session>,
        stale: &Session,
        next: Option<Session>,
    ) -> bool {
        match held.as_ref() {
            Some(current) if current.refresh_token == stale.refresh_token => {
                *held = next;
                true
            }
            _ => false,
        }
    }

    fn request(&self, request: &RequestBuilder) -> Result<Response<Body>, Error> {
        let token = self.bearer_token()?;
        match request.get_method() {
            Method::Get => {
                let mut req = self
                    .agent
                    .get(request.build())
                    .header("apikey", &self.anon_key)
                    .header("Authorization", &format!("Bearer {}", token));
                for header in request.get_headers() {
                    req = req.header(&header.0, &header.1);
                }
                req.call().map_err(Error::from)
            }
            Method::Post => {
                let mut req = self
                    .agent
                    .post(request.build())
                    .header("apikey", &self.anon_key)
                    .header("Authorization", &format!("Bearer {}", token));
                for header in request.get_headers() {
                    req = req.header(&header.0, &header.1);
                }
                req.send_json(request.get_body()).map_err(Error::from)
            }
            Method::Patch => {
                let mut req = self
                    .agent
                    .patch(request.build())
                    .header("apikey", &self.anon_key)
                    .header("Authorization", &format!("Bearer {}", token));
                for header in request.get_headers() {
                    req = req.header(&header.0, &header.1);
                }
                req.send_json(request.get_body()).map_err(Error::from)
            }
        }
    }

    fn with_retry(f: impl Fn() -> Result<Response<Body>, Error>) -> Result<Response<Body>, Error> {
        loop {
            let response = f()?;
            match response.status() {
                StatusCode::TOO_MANY_REQUESTS => {
                    let secs = Self::retry_after_secs(
                        response
                            .headers()
                            .get("Retry-After")
                            .and_then(|secs| secs.to_str().ok()),
                    );
                    log::info!("rate limited, retrying in {secs} seconds");
                    thread::sleep(Duration::from_secs(secs));
                }
                _ => {
                    break Ok(response);
                }
            }
        }
    }

    fn retry_after_secs(header: Option<&str>) -> u64 {
        header.and_then(|secs| secs.parse().ok()).unwrap_or(2)
    }

    /// Send a request and return the deserialized JSON body.
    fn load<T: DeserializeOwned>(&self, request: &RequestBuilder) -> Result<T, Error> {
        let response = Self::with_retry(|| self.request(request))?;
        let mut response = Self::ensure_ok(response)?;
        response
            .body_mut()
            .read_json()
            .map_err(|err| Error::JsonError(Box::new(err)))
    }

    /// Written rows come back wrapped in an array even for a single record.
    fn load_one<T: DeserializeOwned>(&self, request: &RequestBuilder) -> Result<T, Error> {
        let rows: Vec<T> = self.load(request)?;
        rows.into_iter().next().ok_or(Error::UnexpectedResponse)
    }

    fn ensure_ok(mut response: Response<Body>) -> Result<Response<Body>, Error> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let message = Self::error_message(&mut response);
            Err(Error::BackendError { status, message })
        }
    }

    fn error_message(response: &mut Response<Body>) -> String {
        #[derive(Deserialize)]
        struct ErrorBody {
            #[serde(default)]
            msg: Option<String>,
            #[serde(default)]
            message: Option<String>,
            #[serde(default)]
            error_description: Option<String>,
            #[serde(default)]
            error: Option<String>,
        }

        response
            .body_mut()
            .read_json::<ErrorBody>()
            .ok()
            .and_then(|body| {
                body.msg
                    .or(body.message)
                    .or(body.error_description)
                    .or(body.error)
            })
            .unwrap_or_else(|| "no error details".to_string())
    }
}

/// Auth endpoints.
impl Client {
    fn auth_post(
        &self,
        path: &str,
        grant_type: Option<&str>,
        body: serde_json::Value,
    ) -> Result<Response<Body>, Error> {
        let mut url = self.endpoint(path)?;
        if let Some(grant_type) = grant_type {
            url.query_pairs_mut().append_pair("grant_type", grant_type);
        }
        self.agent
            .post(url.as_str())
            .header("apikey", &self.anon_key)
            .header("Authorization", &format!("Bearer {}", self.anon_key))
            .send_json(&body)
            .map_err(Error::from)
    }

    fn read_session(response: Response<Body>) -> Result<Session, Error> {
        let mut response = Self::ensure_ok(response)?;
        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .map_err(|err| Error::JsonError(Box::new(err)))?;
        Ok(token.into_session())
    }

    fn apply_session(&self, event: AuthEvent, session: Option<Session>) {
        *self.session.lock() = session.clone();
        self.dispatcher.emit(event, session.as_ref());
    }

    fn is_auth_rejection(status: StatusCode) -> bool {
        matches!(status.as_u16(), 400 | 401 | 403 | 422)
    }

    /// Restore the held session, rotating it first when expired.  Failures
    /// fold into `None`: a definitive rejection drops the session, a
    /// transport failure keeps it around for a later attempt.
    pub fn get_session(&self) -> Option<Session> {
        let current = self.session.lock().clone()?;
        if !current.is_expired() {
            return Some(current);
        }
        log::info!("restored session is expired, refreshing");
        match self.rotate_session(&current) {
            Ok(rotated) => Some(rotated),
            Err(Error::SessionExpired) => None,
            Err(err) => {
                log::warn!("session refresh failed: {err}");
                None
            }
        }
    }

    fn refresh_session(&self, refresh_token: &str) -> Result<Session, Error> {
        let response = self.auth_post(
            "auth/v1/token",
            Some("refresh_token"),
            json!({ "refresh_token": refresh_token }),
        )?;
        Self::read_session(response)
    }

    pub fn on_session_change(&self, callback: SessionCallback) -> Subscription {
        self.dispatcher.subscribe(callback)
    }

    pub fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), Error> {
        let mut response = self.auth_post(
            "auth/v1/token",
            Some("password"),
            json!({ "email": email, "password": password }),
        )?;
        if Self::is_auth_rejection(response.status()) {
            log::warn!("sign-in rejected: {}", Self::error_message(&mut response));
            return Err(Error::InvalidCredentials);
        }
        let session = Self::read_session(response)?;
        self.apply_session(AuthEvent::SignedIn, Some(session));
        Ok(())
    }

    pub fn sign_up(&self, email: &str, password: &str) -> Result<(), Error> {
        let mut response = self.auth_post(
            "auth/v1/signup",
            None,
            json!({ "email": email, "password": password }),
        )?;
        if Self::is_auth_rejection(response.status()) {
            log::warn!("sign-up rejected: {}", Self::error_message(&mut response));
            return Err(Error::AccountCreationFailed);
        }
        let mut response = Self::ensure_ok(response)?;
        let body: serde_json::Value = response
            .body_mut()
            .read_json()
            .map_err(|err| Error::JsonError(Box::new(err)))?;
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            self.apply_session(AuthEvent::SignedIn, Some(token.into_session()));
        } else {
            // With confirmation enabled the response carries only the new
            // user record; the session arrives once the address is confirmed.
            log::info!("account created, awaiting confirmation");
        }
        Ok(())
    }

    /// Revoke the session server-side and clear it locally.  The local
    /// sign-out proceeds even when revocation fails, a token the server
    /// refuses to revoke is already dead from the client's point of view.
    pub fn sign_out(&self) -> Result<(), Error> {
        let access_token = self
            .session
            .lock()
            .as_ref()
            .map(|session| session.access_token.clone());
        if let Some(access_token) = access_token {
            let url = self.endpoint("auth/v1/logout")?;
            let result = self
                .agent
                .post(url.as_str())
                .header("apikey", &self.anon_key)
                .header("Authorization", &format!("Bearer {}", access_token))
                .send_json(json!({}));
            match result {
                Ok(response) if !response.status().is_success() => {
                    log::warn!("sign-out revocation rejected: {}", response.status());
                }
                Err(err) => {
                    log::warn!("sign-out revocation failed: {err}");
                }
                Ok(_) => {}
            }
        }
        self.apply_session(AuthEvent::SignedOut, None);
        Ok(())
    }

    /// Provider-authorization entry URL.  The browser lands on the consent
    /// page and the redirect comes back to `redirect_to` carrying the code
    /// for `exchange_code_for_session`.
    pub fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<String, Error> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url.into())
    }

    pub fn exchange_code_for_session(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<(), Error> {
        let response = self.auth_post(
            "auth/v1/token",
            Some("pkce"),
            json!({ "auth_code": auth_code, "code_verifier": code_verifier }),
        )?;
        let session = Self::read_session(response)?;
        self.apply_session(AuthEvent::SignedIn, Some(session));
        Ok(())
    }

    fn current_user_id(&self) -> Result<Arc<str>, Error> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.user_id())
            .ok_or(Error::Unauthenticated)
    }
}

impl AuthBackend for Client {
    fn get_session(&self) -> Option<Session> {
        self.get_session()
    }

    fn on_session_change(&self, callback: SessionCallback) -> Subscription {
        self.on_session_change(callback)
    }

    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), Error> {
        self.sign_in_with_password(email, password)
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<(), Error> {
        self.sign_up(email, password)
    }

    fn sign_out(&self) -> Result<(), Error> {
        self.sign_out()
    }
}

fn search_filter(query: &str) -> String {
    format!("(title.ilike.%{query}%,artist.ilike.%{query}%)")
}

/// Track endpoints.
impl Client {
    pub fn list_tracks(&self) -> Result<Vec<Track>, Error> {
        let request = RequestBuilder::new(self.endpoint("rest/v1/tracks")?, Method::Get, None)
            .query("select", "*")
            .query("order", "created_at.desc");
        self.load(&request)
    }

    pub fn search_tracks(&self, query: &str) -> Result<Vec<Track>, Error> {
        let request = RequestBuilder::new(self.endpoint("rest/v1/tracks")?, Method::Get, None)
            .query("select", "*")
            .query("or", search_filter(query))
            .query("limit", 20);
        self.load(&request)
    }

    pub fn insert_track(
        &self,
        title: &str,
        artist: &str,
        file_url: &str,
        user_id: &str,
    ) -> Result<Track, Error> {
        let request = RequestBuilder::new(
            self.endpoint("rest/v1/tracks")?,
            Method::Post,
            Some(json!({
                "title": title,
                "artist": artist,
                "file_url": file_url,
                "user_id": user_id,
            })),
        )
        .header("Prefer", "return=representation");
        self.load_one(&request)
    }
}

/// Playlist endpoints.
impl Client {
    pub fn list_playlists(&self) -> Result<Vec<Playlist>, Error> {
        let user_id = self.current_user_id()?;
        let request = RequestBuilder::new(self.endpoint("rest/v1/playlists")?, Method::Get, None)
            .query("select", "*")
            .query("user_id", format!("eq.{user_id}"))
            .query("order", "created_at.desc");
        self.load(&request)
    }

    pub fn create_playlist(&self, name: &str) -> Result<Playlist, Error> {
        let user_id = self.current_user_id()?;
        let request = RequestBuilder::new(
            self.endpoint("rest/v1/playlists")?,
            Method::Post,
            Some(json!({ "name": name, "user_id": user_id })),
        )
        .header("Prefer", "return=representation");
        self.load_one(&request)
    }

    pub fn rename_playlist(&self, id: &str, name: &str) -> Result<Playlist, Error> {
        let request = RequestBuilder::new(
            self.endpoint("rest/v1/playlists")?,
            Method::Patch,
            Some(json!({ "name": name })),
        )
        .query("id", format!("eq.{id}"))
        .header("Prefer", "return=representation");
        self.load_one(&request)
    }
}

/// Storage endpoints.
impl Client {
    const MUSIC_BUCKET: &'static str = "music";

    /// Upload the file, derive its public URL and register the track row
    /// under the signed-in user.
    pub fn upload_track(&self, title: &str, artist: &str, path: &Path) -> Result<Track, Error> {
        let user_id = self.current_user_id()?;
        let object_name = Self::object_name(path);
        let bytes = fs::read(path)?;
        self.upload_object(Self::MUSIC_BUCKET, &object_name, &bytes)?;
        let file_url = self.public_url(Self::MUSIC_BUCKET, &object_name)?;
        self.insert_track(title, artist, &file_url, &user_id)
    }

    fn upload_object(&self, bucket: &str, name: &str, bytes: &[u8]) -> Result<(), Error> {
        let token = self.bearer_token()?;
        let url = self.endpoint(&format!("storage/v1/object/{bucket}/{name}"))?;
        let content_type = infer::get(bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream");
        log::info!(
            "uploading {} bytes to {bucket}/{name} as {content_type}",
            bytes.len()
        );
        let response = self
            .agent
            .post(url.as_str())
            .header("apikey", &self.anon_key)
            .header("Authorization", &format!("Bearer {}", token))
            .header("Content-Type", content_type)
            .send(bytes)?;
        Self::ensure_ok(response).map(|_| ())
    }

    fn public_url(&self, bucket: &str, name: &str) -> Result<String, Error> {
        Ok(self
            .endpoint(&format!("storage/v1/object/public/{bucket}/{name}"))?
            .into())
    }

    /// Random object name, keeping the source extension so the serving side
    /// can guess a content type.
    fn object_name(path: &Path) -> String {
        let mut stem = [0u8; 8];
        rand::rng().fill_bytes(&mut stem);
        let stem: String = stem.iter().map(|byte| format!("{byte:02x}")).collect();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserProfile,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at.unwrap_or(now + self.expires_in),
            user: self.user,
        }
    }
}

#[derive(Debug, Clone)]
enum Method {
    Get,
    Post,
    Patch,
}

#[derive(Debug, Clone)]
struct RequestBuilder {
    url: Url,
    headers: Vec<(String, String)>,
    method: Method,
    body: Option<serde_json::Value>,
}

impl RequestBuilder {
    fn new(url: Url, method: Method, body: Option<serde_json::Value>) -> Self {
        Self {
            url,
            headers: Vec::new(),
            method,
            body,
        }
    }

    fn query(mut self, key: impl Display, value: impl Display) -> Self {
        self.url
            .query_pairs_mut()
            .append_pair(&key.to_string(), &value.to_string());
        self
    }

    fn header(mut self, key: impl Display, value: impl Display) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    fn get_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn get_body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    fn get_method(&self) -> &Method {
        &self.method
    }

    fn build(&self) -> String {
        self.url.to_string()
    }
}
