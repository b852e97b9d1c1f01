use std::path::PathBuf;

use chrono::{DateTime, Datelike, Local, Utc};
use serde_json::Value;

use crate::changes::{ChangeSet, ChangeTag};
use crate::history::Ride;
use crate::portal::cookies::CookieJar;
use crate::portal::http::HttpTransport;
use crate::portal::{login, logout, query, PortalClient, PortalError, OK};
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No data directory configured yet.
    None,
    /// Checking whether persisted cookies still authenticate.
    LoginCheck,
    /// Fetching the profile after an interactive sign-in.
    ProfileQuery,
    ServiceQuery,
    HistoryQuery,
    Unauthorized,
    LoggingIn,
    LoginFailed,
    LoginNetworkError,
    NetworkError,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    DataDir,
    Login,
    ErrorText,
    HttpError,
    SessionState,
    LastUpdate,
    LastNetworkError,
    FirstNames,
    LastName,
    FullName,
    Card,
    TagId,
    History,
    RideInProgress,
    RideDuration,
    Years,
    LastYear,
    ThisYear,
}

impl ChangeTag for SessionChange {
    const ALL: &'static [SessionChange] = &[
        SessionChange::DataDir,
        SessionChange::Login,
        SessionChange::ErrorText,
        SessionChange::HttpError,
        SessionChange::SessionState,
        SessionChange::LastUpdate,
        SessionChange::LastNetworkError,
        SessionChange::FirstNames,
        SessionChange::LastName,
        SessionChange::FullName,
        SessionChange::Card,
        SessionChange::TagId,
        SessionChange::History,
        SessionChange::RideInProgress,
        SessionChange::RideDuration,
        SessionChange::Years,
        SessionChange::LastYear,
        SessionChange::ThisYear,
    ];
}

/// Top-level portal session: sequences authentication, profile and
/// history queries, owns the cookie jar and its persisted form, and
/// derives the presentation-facing fields.
///
/// Mutating operations take `&mut self`, so at most one request chain
/// is ever in flight; dropping the returned future abandons the chain
/// without touching the session again.
pub struct Session<T> {
    portal: PortalClient<T>,
    data_dir: Option<PathBuf>,
    state: SessionState,
    login: String,
    error_text: String,
    http_error: u16,
    last_update: Option<DateTime<Utc>>,
    last_network_error: Option<DateTime<Utc>>,
    first_names: String,
    last_name: String,
    card: String,
    tag_id: String,
    history: Vec<Value>,
    ride_in_progress: bool,
    ride_duration: u32,
    years: Vec<i32>,
    this_year: i32,
    changes: ChangeSet<SessionChange>,
}

impl<T: HttpTransport> Session<T> {
    pub fn new(transport: T) -> Self {
        Session {
            portal: PortalClient::new(transport),
            data_dir: None,
            state: SessionState::None,
            login: String::new(),
            error_text: String::new(),
            http_error: 0,
            last_update: None,
            last_network_error: None,
            first_names: String::new(),
            last_name: String::new(),
            card: String::new(),
            tag_id: String::new(),
            history: Vec::new(),
            ride_in_progress: false,
            ride_duration: 0,
            years: Vec::new(),
            this_year: Local::now().year(),
            changes: ChangeSet::new(),
        }
    }

    // ----- accessors -------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn error_text(&self) -> &str {
        &self.error_text
    }

    /// Last failing HTTP status, 0 when the last request went through
    /// (or never returned at all).
    pub fn http_error(&self) -> u16 {
        self.http_error
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn last_network_error(&self) -> Option<DateTime<Utc>> {
        self.last_network_error
    }

    pub fn first_names(&self) -> &str {
        &self.first_names
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_names.clone()
        } else if self.first_names.is_empty() {
            self.last_name.clone()
        } else {
            format!("{} {}", self.first_names, self.last_name)
        }
    }

    /// The city-bike card number, empty when the account has none.
    pub fn card(&self) -> &str {
        &self.card
    }

    /// Lowercase NFC tag id derived from the card number.
    pub fn tag_id(&self) -> &str {
        &self.tag_id
    }

    pub fn history(&self) -> &[Value] {
        &self.history
    }

    pub fn ride_in_progress(&self) -> bool {
        self.ride_in_progress
    }

    pub fn ride_duration(&self) -> u32 {
        self.ride_duration
    }

    /// Years seen in the history, ascending and deduplicated.
    pub fn years(&self) -> &[i32] {
        &self.years
    }

    /// Most recent history year, 0 when there is no history.
    pub fn last_year(&self) -> i32 {
        self.years.last().copied().unwrap_or(0)
    }

    pub fn this_year(&self) -> i32 {
        self.this_year
    }

    /// Pending change notifications, cleared by the call.
    pub fn take_changes(&mut self) -> ChangeSet<SessionChange> {
        self.changes.take()
    }

    // ----- operations ------------------------------------------------

    /// Points the session at its storage directory, loading persisted
    /// cookies and the remembered login name, then runs the login
    /// check. `None` parks the session.
    pub async fn set_data_dir(&mut self, dir: Option<PathBuf>) {
        if self.data_dir == dir {
            return;
        }
        let had_dir = self.data_dir.is_some();
        self.data_dir = dir;
        self.changes.insert(SessionChange::DataDir);
        self.set_error_text("");
        self.set_first_names("");
        self.set_last_name("");
        if had_dir {
            // Carry the live jar over to the new location.
            self.save_cookies();
        }
        let jar = self.load_cookies();
        log::debug!("loaded {} persisted cookie(s)", jar.len());
        self.portal.set_cookies(jar);
        let login = self
            .data_dir
            .as_deref()
            .and_then(|dir| store::read_line(dir, store::LOGIN_FILE))
            .unwrap_or_default();
        self.set_login(&login);

        if self.data_dir.is_none() {
            self.set_state(SessionState::None);
        } else {
            self.login_check().await;
        }
    }

    /// Re-runs the login check; the entry point after any failure.
    pub async fn restart(&mut self) {
        self.login_check().await;
    }

    /// Interactive sign-in. The outcome lands in the session state:
    /// `Ready` after the follow-up queries, `LoginFailed` when the
    /// portal rejected the credentials, `LoginNetworkError` otherwise.
    pub async fn sign_in(&mut self, login: &str, password: &str) {
        log::info!("signing in as {login}");
        if let Some(dir) = self.data_dir.clone() {
            store::write_line(&dir, store::LOGIN_FILE, login);
        }
        self.set_login(login);
        self.begin_request(SessionState::LoggingIn);

        match login::sign_in(&mut self.portal, login, password).await {
            Ok(()) => {
                self.save_cookies();
                self.set_error_text("");
                self.profile_query().await;
            }
            Err(PortalError::Credentials(message)) => {
                log::info!("sign-in failed: {message:?}");
                self.save_cookies();
                self.set_error_text(&message);
                self.set_state(SessionState::LoginFailed);
            }
            Err(err) => self.login_error(err),
        }
    }

    /// Signs out of the portal, drops every local trace of the session
    /// and re-runs the (now unauthenticated) login check.
    pub async fn log_out(&mut self) {
        log::info!("logging out");
        match logout::log_out(&mut self.portal).await {
            Ok(status) => {
                if status != OK {
                    log::debug!("logout finished with HTTP {status}");
                }
                self.finish_logout();
                self.login_check().await;
            }
            // The portal never saw the logout; local cleanup would
            // leave the server-side session alive.
            Err(err) => self.request_error(err),
        }
    }

    /// Re-fetches the ride history.
    pub async fn refresh(&mut self) {
        log::debug!("refreshing history");
        self.history_query().await;
    }

    /// Recomputes the open ride's duration; drive this once a second
    /// while [Self::ride_in_progress] holds.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if !self.ride_in_progress {
            return;
        }
        let duration = self.current_ride_duration(now);
        if duration > self.ride_duration {
            self.ride_duration = duration;
            self.changes.insert(SessionChange::RideDuration);
        }
    }

    // ----- query sequencing ------------------------------------------

    async fn login_check(&mut self) {
        self.begin_request(SessionState::LoginCheck);
        match query::user_info(&mut self.portal).await {
            Ok(info) => {
                self.save_cookies();
                log::debug!("authenticated: {}", info.authenticated);
                if info.authenticated {
                    self.profile_received(&info);
                    self.service_query().await;
                } else {
                    self.set_first_names("");
                    self.set_last_name("");
                    self.set_state(SessionState::Unauthorized);
                }
            }
            Err(err) => self.login_error(err),
        }
    }

    async fn profile_query(&mut self) {
        self.begin_request(SessionState::ProfileQuery);
        match query::user_info(&mut self.portal).await {
            Ok(info) if info.authenticated => {
                self.save_cookies();
                self.profile_received(&info);
                self.service_query().await;
            }
            Ok(_) => {
                self.set_first_names("");
                self.set_last_name("");
                self.set_state(SessionState::Unauthorized);
            }
            Err(err) => self.login_error(err),
        }
    }

    async fn service_query(&mut self) {
        self.begin_request(SessionState::ServiceQuery);
        match query::service_info(&mut self.portal).await {
            Ok(service) => {
                self.set_ident(&service.ident_type, &service.ident_data);
                self.touch_updated();
                self.history_query().await;
            }
            Err(err) => self.request_error(err),
        }
    }

    async fn history_query(&mut self) {
        self.begin_request(SessionState::HistoryQuery);
        match query::ride_history(&mut self.portal).await {
            Ok(history) => self.apply_history(history),
            Err(err) => self.request_error(err),
        }
    }

    fn profile_received(&mut self, info: &query::UserInfo) {
        let (first_names, last_name) = info.names();
        self.set_first_names(&first_names);
        self.set_last_name(&last_name);
        self.touch_updated();
    }

    fn apply_history(&mut self, history: Vec<Value>) {
        let was_in_progress = self.ride_in_progress;
        log::debug!("loaded {} trip(s)", history.len());
        self.history = history;
        self.changes.insert(SessionChange::History);

        let mut years: Vec<i32> = self
            .history
            .iter()
            .filter_map(|entry| crate::history::parse_date(entry.get("departureDate")))
            .map(|date| date.year())
            .collect();
        years.sort_unstable();
        years.dedup();
        if years != self.years {
            if years.last() != self.years.last() {
                self.changes.insert(SessionChange::LastYear);
            }
            self.years = years;
            self.changes.insert(SessionChange::Years);
        }

        let in_progress = self
            .history
            .first()
            .map(Ride::from_json)
            .is_some_and(|ride| ride.in_progress());
        let duration = if in_progress {
            self.current_ride_duration(Utc::now())
        } else {
            0
        };
        if in_progress != was_in_progress {
            self.ride_in_progress = in_progress;
            self.changes.insert(SessionChange::RideInProgress);
            self.changes.insert(SessionChange::RideDuration);
        }
        if duration != self.ride_duration {
            self.ride_duration = duration;
            self.changes.insert(SessionChange::RideDuration);
        }

        self.touch_updated();
        self.set_state(SessionState::Ready);
    }

    fn current_ride_duration(&self, now: DateTime<Utc>) -> u32 {
        self.history
            .first()
            .map(Ride::from_json)
            .filter(Ride::in_progress)
            .map(|ride| ride.duration_at(now))
            .unwrap_or(0)
    }

    fn finish_logout(&mut self) {
        let was_in_progress = self.ride_in_progress;

        self.portal.cookies_mut().clear();
        if let Some(dir) = self.data_dir.as_deref() {
            store::remove(dir, store::COOKIES_FILE);
        }
        if !self.history.is_empty() {
            self.history.clear();
            self.changes.insert(SessionChange::History);
        }
        if !self.years.is_empty() {
            self.years.clear();
            self.changes.insert(SessionChange::Years);
            self.changes.insert(SessionChange::LastYear);
        }
        if was_in_progress {
            self.ride_in_progress = false;
            self.ride_duration = 0;
            self.changes.insert(SessionChange::RideInProgress);
            self.changes.insert(SessionChange::RideDuration);
        }
        self.set_http_status(OK);
        self.set_error_text("");
        self.set_first_names("");
        self.set_last_name("");
        self.set_ident("", "");
        self.set_state(SessionState::Unauthorized);
    }

    // ----- failure handling ------------------------------------------

    fn login_error(&mut self, err: PortalError) {
        self.record_error(err, SessionState::LoginNetworkError);
    }

    fn request_error(&mut self, err: PortalError) {
        self.record_error(err, SessionState::NetworkError);
    }

    fn record_error(&mut self, err: PortalError, state: SessionState) {
        log::debug!("request failed: {err}");
        self.last_network_error = Some(Utc::now());
        self.changes.insert(SessionChange::LastNetworkError);
        self.set_error_text("");
        self.set_http_status(err.status());
        self.set_state(state);
    }

    // ----- field setters ---------------------------------------------

    fn begin_request(&mut self, state: SessionState) {
        self.set_state(state);
        self.set_http_status(0);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::info!("{:?} => {:?}", self.state, state);
            self.state = state;
            self.changes.insert(SessionChange::SessionState);
        }
    }

    fn set_login(&mut self, login: &str) {
        if self.login != login {
            self.login = login.to_owned();
            self.changes.insert(SessionChange::Login);
        }
    }

    fn set_error_text(&mut self, error_text: &str) {
        if self.error_text != error_text {
            self.error_text = error_text.to_owned();
            self.changes.insert(SessionChange::ErrorText);
        }
    }

    fn set_http_status(&mut self, status: u16) {
        let http_error = if status == OK { 0 } else { status };
        if self.http_error != http_error {
            if http_error != 0 {
                log::debug!("HTTP error {http_error}");
            }
            self.http_error = http_error;
            self.changes.insert(SessionChange::HttpError);
        }
    }

    fn set_first_names(&mut self, first_names: &str) {
        if self.first_names != first_names {
            self.first_names = first_names.to_owned();
            self.changes.insert(SessionChange::FirstNames);
            self.changes.insert(SessionChange::FullName);
        }
    }

    fn set_last_name(&mut self, last_name: &str) {
        if self.last_name != last_name {
            self.last_name = last_name.to_owned();
            self.changes.insert(SessionChange::LastName);
            self.changes.insert(SessionChange::FullName);
        }
    }

    /// Accepts the identity-card pair only in the shape the city-bike
    /// service hands out: type "card", 16 characters, leading "00".
    /// The tag id is the card's trailing 14 characters, lowercased.
    fn set_ident(&mut self, ident_type: &str, ident_data: &str) {
        let (card, tag_id) = if ident_type == "card"
            && ident_data.len() == 16
            && ident_data.starts_with("00")
        {
            (ident_data.to_owned(), ident_data[2..].to_ascii_lowercase())
        } else {
            (String::new(), String::new())
        };

        if self.card != card {
            log::debug!("card {card:?}");
            self.card = card;
            self.changes.insert(SessionChange::Card);
        }
        if self.tag_id != tag_id {
            self.tag_id = tag_id;
            self.changes.insert(SessionChange::TagId);
        }
    }

    fn touch_updated(&mut self) {
        self.last_update = Some(Utc::now());
        self.changes.insert(SessionChange::LastUpdate);
    }

    // ----- persistence -----------------------------------------------

    fn save_cookies(&self) {
        if let Some(dir) = self.data_dir.as_deref() {
            store::write_lines(dir, store::COOKIES_FILE, &self.portal.cookies().to_lines());
        }
    }

    fn load_cookies(&self) -> CookieJar {
        match self.data_dir.as_deref() {
            Some(dir) => CookieJar::from_lines(store::read_lines(dir, store::COOKIES_FILE)),
            None => CookieJar::new(),
        }
    }
}
