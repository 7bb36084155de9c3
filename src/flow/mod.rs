//! The call collection state machine.
//!
//! A call walks through [`Step`]s: anonymous check, welcome, caller lookup,
//! name/pickup/destination collection with bounded retries, a confirm and
//! correct loop, then registration or transfer to an operator. Each step is
//! a transition from one [`CallState`] to the next, so the whole dialogue
//! can be driven against a scripted channel and fake services.

mod commands;
mod prompts;
#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::agi::{AgiChannel, AgiEnv, AgiError, AgiSession};
use crate::audit::AuditLog;
use crate::config::{
    self, CollectionConfig, Config, MessageConfig, PromptConfig, RegisterFailurePolicy, Tenant,
};
use crate::progress::{keys, FieldValue, ProgressStore};
use crate::services::geocode::AddressKind;
use crate::services::{CallServices, CallerProfile, HttpServices, Location};
use crate::validate::{validate, validate_value};

use commands::Telephony;

/// Identity and working directory of one call.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: String,
    pub caller_id: String,
    pub extension: String,
    /// `<work_root>/<extension>/<caller>/<id>`: recordings, prompts,
    /// `progress.json` and `log.txt`.
    pub work_dir: PathBuf,
}

impl CallSession {
    pub fn from_env(env: &AgiEnv, work_root: &Path) -> Self {
        let id = env.unique_id().to_string();
        let caller_id = env.caller_id();
        let extension = env.extension().to_string();
        let work_dir = work_root
            .join(path_segment(&extension, "default"))
            .join(path_segment(&caller_id, "anonymous"))
            .join(path_segment(&id, "unknown"));
        Self {
            id,
            caller_id,
            extension,
            work_dir,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        let caller = self.caller_id.trim().to_lowercase();
        caller.is_empty() || caller == "anonymous" || caller == "unknown"
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.work_dir.join("recordings")
    }

    fn prepare(&self) {
        if let Err(e) = std::fs::create_dir_all(self.recordings_dir()) {
            tracing::error!(call_id = %self.id, dir = %self.work_dir.display(), "Cannot create call directory: {e}");
        }
    }
}

/// Keep engine-supplied values from escaping the work root.
fn path_segment(value: &str, fallback: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() => c,
            '.' | '-' | '_' | '+' => c,
            _ => '_',
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => fallback.to_string(),
        _ => cleaned,
    }
}

/// One of the three collected fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Name,
    Pickup,
    Destination,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Name => "name",
            Stage::Pickup => "pickup",
            Stage::Destination => "destination",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Stage::Name => keys::NAME,
            Stage::Pickup => keys::PICKUP,
            Stage::Destination => keys::DESTINATION,
        }
    }

    fn location_key(self) -> Option<&'static str> {
        match self {
            Stage::Name => None,
            Stage::Pickup => Some(keys::PICKUP_LOCATION),
            Stage::Destination => Some(keys::DESTINATION_LOCATION),
        }
    }

    fn address_kind(self) -> Option<AddressKind> {
        match self {
            Stage::Name => None,
            Stage::Pickup => Some(AddressKind::Pickup),
            Stage::Destination => Some(AddressKind::Destination),
        }
    }

    /// Confirm-menu keys 1, 2, 3 re-collect a field.
    fn from_menu(choice: &str) -> Option<Self> {
        match choice {
            "1" => Some(Stage::Name),
            "2" => Some(Stage::Pickup),
            "3" => Some(Stage::Destination),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferReason {
    Anonymous,
    DoNotServe,
    CollectionFailed(Stage),
    ConfirmExhausted,
    MenuMisinput,
    RegistrationFailed,
}

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Registered { success: bool },
    Transferred(TransferReason),
    /// The channel went away before the flow finished.
    HungUp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    CheckAnonymous,
    Welcome,
    LookupCaller,
    OfferPickup,
    Collect(Stage),
    Confirm { round: u32 },
    Recollect { stage: Stage, round: u32 },
    Register,
    Transfer(TransferReason),
    Done(CallOutcome),
}

/// Text captured so far, used for the spoken summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    pub name: Option<String>,
    pub pickup: Option<String>,
    pub destination: Option<String>,
}

impl Collected {
    fn set(&mut self, stage: Stage, text: String) {
        let slot = match stage {
            Stage::Name => &mut self.name,
            Stage::Pickup => &mut self.pickup,
            Stage::Destination => &mut self.destination,
        };
        *slot = Some(text);
    }

    fn get(&self, stage: Stage) -> &str {
        match stage {
            Stage::Name => &self.name,
            Stage::Pickup => &self.pickup,
            Stage::Destination => &self.destination,
        }
        .as_deref()
        .unwrap_or_default()
    }
}

/// Everything a transition needs to know about the call so far.
#[derive(Debug, Clone, PartialEq)]
pub struct CallState {
    pub step: Step,
    pub profile: CallerProfile,
    pub collected: Collected,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            step: Step::CheckAnonymous,
            profile: CallerProfile::default(),
            collected: Collected::default(),
        }
    }
}

/// A successfully collected field.
#[derive(Debug, Clone)]
struct Captured {
    text: String,
    location: Option<Location>,
}

/// Run `work` with music on hold playing to the caller.
async fn on_hold<C: AgiChannel, T>(
    tel: &mut Telephony<C>,
    work: impl Future<Output = T>,
) -> Result<T, AgiError> {
    tel.start_music_on_hold().await?;
    let out = work.await;
    tel.stop_music_on_hold().await?;
    Ok(out)
}

pub struct CallFlow<C, S> {
    tel: Telephony<C>,
    services: S,
    session: CallSession,
    store: ProgressStore,
    audit: AuditLog,
    prompts: PromptConfig,
    messages: MessageConfig,
    collection: CollectionConfig,
    operator_dial: String,
    operator_timeout: u32,
}

impl<C: AgiChannel, S: CallServices> CallFlow<C, S> {
    pub fn new(channel: C, services: S, session: CallSession, config: &Config, tenant: &Tenant) -> Self {
        let audit = AuditLog::new(session.work_dir.join("log.txt"), session.id.clone());

        let mut prompts = config.prompts.clone();
        if let Some(welcome) = tenant.welcome_playback.as_ref().filter(|w| !w.is_empty()) {
            prompts.welcome = welcome.clone();
        }
        let operator_dial = tenant
            .fail_call_to
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| config.operator.dial.clone());

        Self {
            tel: Telephony::new(channel, audit.clone()),
            services,
            store: ProgressStore::new(session.work_dir.join("progress.json")),
            audit,
            session,
            prompts,
            messages: config.messages.clone(),
            collection: config.collection.clone(),
            operator_dial,
            operator_timeout: config.operator.timeout_secs,
        }
    }

    /// Drive the call to completion.
    pub async fn run(mut self) -> CallOutcome {
        self.session.prepare();
        tracing::info!(
            call_id = %self.session.id,
            caller = %self.session.caller_id,
            extension = %self.session.extension,
            "Starting call"
        );
        self.audit
            .record(format!("Starting call processing for {}", self.session.caller_id));

        let mut state = CallState::default();
        loop {
            if let Step::Done(outcome) = &state.step {
                tracing::info!(call_id = %self.session.id, ?outcome, "Call finished");
                self.audit.record(format!("Call finished: {outcome:?}"));
                return outcome.clone();
            }

            state = match self.advance(state).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(call_id = %self.session.id, "Call ended early: {e}");
                    self.audit.record(format!("Call ended early: {e}"));
                    return CallOutcome::HungUp;
                }
            };
        }
    }

    /// Perform one step and return the state it leads to.
    pub async fn advance(&mut self, state: CallState) -> Result<CallState, AgiError> {
        let CallState {
            step,
            mut profile,
            mut collected,
        } = state;

        let next = match step {
            Step::CheckAnonymous => {
                self.store_field(keys::PHONE, FieldValue::Text(self.session.caller_id.clone()));
                if self.session.is_anonymous() {
                    self.audit
                        .record("Anonymous call detected, transferring to operator");
                    Step::Transfer(TransferReason::Anonymous)
                } else {
                    Step::Welcome
                }
            }

            Step::Welcome => {
                self.tel.wait(1).await?;
                self.tel.playback(&self.prompts.welcome).await?;
                Step::LookupCaller
            }

            Step::LookupCaller => {
                self.audit.record("Checking for existing user data");
                profile = on_hold(
                    &mut self.tel,
                    self.services.lookup_caller(&self.session.caller_id),
                )
                .await?;
                self.audit.record(format!("User data result: {profile:?}"));

                if profile.do_not_serve {
                    self.audit.record("Caller is marked do-not-serve");
                    Step::Transfer(TransferReason::DoNotServe)
                } else if let Some(name) = profile
                    .name
                    .clone()
                    .filter(|n| validate(n).is_acceptable(self.collection.low_confidence))
                {
                    self.audit.record(format!("Using existing name: {name}"));
                    self.store_field(keys::NAME, FieldValue::Text(name.clone()));
                    collected.name = Some(name);
                    self.pickup_step(&profile)
                } else {
                    Step::Collect(Stage::Name)
                }
            }

            Step::OfferPickup => match self.offer_pickup(&profile).await? {
                Some(address) => {
                    collected.pickup = Some(address);
                    Step::Collect(Stage::Destination)
                }
                None => Step::Collect(Stage::Pickup),
            },

            Step::Collect(stage) => match self.collect(stage).await? {
                Some(captured) => {
                    self.save(stage, &captured);
                    collected.set(stage, captured.text);
                    match stage {
                        Stage::Name => self.pickup_step(&profile),
                        Stage::Pickup => Step::Collect(Stage::Destination),
                        Stage::Destination => Step::Confirm { round: 1 },
                    }
                }
                None => Step::Transfer(TransferReason::CollectionFailed(stage)),
            },

            Step::Confirm { round } if round > self.collection.confirm_rounds => {
                Step::Transfer(TransferReason::ConfirmExhausted)
            }

            Step::Confirm { round } => {
                self.audit.record(format!(
                    "Confirmation attempt: {round}/{}",
                    self.collection.confirm_rounds
                ));
                let summary = prompts::confirm_summary(
                    &self.messages,
                    collected.get(Stage::Name),
                    collected.get(Stage::Pickup),
                    collected.get(Stage::Destination),
                );
                let base = self.session.work_dir.join("confirm");
                if let Some(prompt) =
                    on_hold(&mut self.tel, self.services.synthesize(&summary, &base)).await?
                {
                    self.tel.playback(&prompt.display().to_string()).await?;
                }
                self.confirm_menu(round).await?
            }

            Step::Recollect { stage, round } => match self.collect(stage).await? {
                Some(captured) => {
                    self.save(stage, &captured);
                    collected.set(stage, captured.text);
                    Step::Confirm { round: round + 1 }
                }
                None => Step::Transfer(TransferReason::CollectionFailed(stage)),
            },

            Step::Register => self.register().await?,

            Step::Transfer(reason) => {
                tracing::info!(call_id = %self.session.id, ?reason, dial = %self.operator_dial, "Transferring to operator");
                self.audit
                    .record(format!("Call failed - transferring to operator ({reason:?})"));
                let prompt = match reason {
                    TransferReason::Anonymous => &self.prompts.anonymous,
                    _ => &self.prompts.failure,
                };
                self.tel.playback(prompt).await?;
                self.tel
                    .dial(&self.operator_dial, self.operator_timeout)
                    .await?;
                Step::Done(CallOutcome::Transferred(reason))
            }

            Step::Done(outcome) => Step::Done(outcome),
        };

        Ok(CallState {
            step: next,
            profile,
            collected,
        })
    }

    /// Offer the remembered pickup if it is usable, else ask for one.
    fn pickup_step(&self, profile: &CallerProfile) -> Step {
        let offerable = profile.pickup_location().is_some_and(|location| {
            validate(&location.address).is_acceptable(self.collection.low_confidence)
                && self.accept_location(&location)
        });
        if offerable {
            Step::OfferPickup
        } else {
            Step::Collect(Stage::Pickup)
        }
    }

    /// Returns the accepted address, or `None` to collect a fresh one.
    async fn offer_pickup(&mut self, profile: &CallerProfile) -> Result<Option<String>, AgiError> {
        let Some(location) = profile.pickup_location() else {
            return Ok(None);
        };

        let text = prompts::offer_pickup(&self.messages, &location.address);
        let base = self.session.work_dir.join("user_prompt");
        let Some(prompt) = on_hold(&mut self.tel, self.services.synthesize(&text, &base)).await?
        else {
            self.audit
                .record("Could not synthesize address offer, collecting a new pickup");
            return Ok(None);
        };

        let choice = self
            .tel
            .read_digit(
                "USER_CHOICE",
                &prompt.display().to_string(),
                self.collection.dtmf_timeout_secs,
            )
            .await?;
        self.audit.record(format!("Default address choice: {choice}"));
        if choice != "1" {
            return Ok(None);
        }

        let captured = Captured {
            text: location.address.clone(),
            location: Some(location),
        };
        self.save(Stage::Pickup, &captured);
        self.tel
            .playback(&self.prompts.default_address_accepted)
            .await?;
        Ok(Some(captured.text))
    }

    /// The shared retry primitive: prompt, record, transcribe, validate and,
    /// for addresses, geocode. `None` once every attempt has failed.
    async fn collect(&mut self, stage: Stage) -> Result<Option<Captured>, AgiError> {
        let max = self.collection.max_attempts;
        let prompt = match stage {
            Stage::Name => self.prompts.name.clone(),
            Stage::Pickup => self.prompts.pickup.clone(),
            Stage::Destination => self.prompts.destination.clone(),
        };

        for attempt in 1..=max {
            tracing::info!(call_id = %self.session.id, stage = stage.as_str(), attempt, "Collecting");
            self.audit.record(format!(
                "Collecting {} - Attempt: {attempt}/{max}",
                stage.as_str()
            ));

            self.tel.playback(&prompt).await?;
            let recording = self
                .session
                .recordings_dir()
                .join(format!("{}_{attempt}.wav16", stage.as_str()));
            self.tel
                .record(
                    &recording,
                    self.collection.record_silence_secs,
                    self.collection.record_max_secs,
                )
                .await?;

            let text = on_hold(&mut self.tel, self.services.transcribe(&recording)).await?;
            let text = text.trim().to_string();
            self.audit
                .record(format!("{} STT result: {text}", stage.as_str()));

            if let Some(captured) = self.accept(stage, text).await? {
                self.audit.record(format!(
                    "{} successfully captured: {}",
                    stage.as_str(),
                    captured.text
                ));
                return Ok(Some(captured));
            }

            if attempt < max {
                self.tel.playback(&self.prompts.invalid).await?;
            }
        }

        tracing::warn!(call_id = %self.session.id, stage = stage.as_str(), "Attempts exhausted");
        Ok(None)
    }

    /// Validate a transcript and, for address stages, geocode it.
    async fn accept(&mut self, stage: Stage, text: String) -> Result<Option<Captured>, AgiError> {
        if !self.accept_text(&text) {
            self.audit
                .record(format!("{} validation failed", stage.as_str()));
            return Ok(None);
        }

        let Some(kind) = stage.address_kind() else {
            return Ok(Some(Captured {
                text,
                location: None,
            }));
        };

        let location = on_hold(&mut self.tel, self.services.geocode(&text, kind)).await?;
        match location {
            Some(location) if self.accept_location(&location) => {
                self.audit.record(format!(
                    "{} geocoded: {} ({}, {})",
                    stage.as_str(),
                    location.address,
                    location.lat_lng.lat,
                    location.lat_lng.lng
                ));
                Ok(Some(Captured {
                    text,
                    location: Some(location),
                }))
            }
            Some(location) => {
                self.audit.record(format!(
                    "{} geocode rejected as {:?}",
                    stage.as_str(),
                    location.location_type
                ));
                Ok(None)
            }
            None => {
                self.audit
                    .record(format!("{} geocoding failed", stage.as_str()));
                Ok(None)
            }
        }
    }

    fn accept_text(&self, text: &str) -> bool {
        validate(text).is_acceptable(self.collection.low_confidence)
            && text.trim().chars().count() >= self.collection.min_transcript_chars
    }

    /// Single acceptance rule for offered and freshly geocoded locations.
    fn accept_location(&self, location: &Location) -> bool {
        validate_value(&location.validation_value()).is_acceptable(self.collection.low_confidence)
    }

    async fn confirm_menu(&mut self, round: u32) -> Result<Step, AgiError> {
        let mut invalid = 0;
        loop {
            let choice = self
                .tel
                .read_digit(
                    "DTMF_OPTION",
                    &self.prompts.options,
                    self.collection.dtmf_timeout_secs,
                )
                .await?;
            self.audit.record(format!("User pressed DTMF: {choice}"));

            if choice == "0" {
                return Ok(Step::Register);
            }
            if let Some(stage) = Stage::from_menu(&choice) {
                return Ok(Step::Recollect { stage, round });
            }

            self.tel.playback(&self.prompts.invalid).await?;
            invalid += 1;
            if self
                .collection
                .max_invalid_menu_inputs
                .is_some_and(|max| invalid >= max)
            {
                return Ok(Step::Transfer(TransferReason::MenuMisinput));
            }
        }
    }

    async fn register(&mut self) -> Result<Step, AgiError> {
        let record = self.store.load();
        let registration = on_hold(&mut self.tel, self.services.register_call(&record)).await?;
        self.audit.record(format!(
            "Registration result: success={} message={}",
            registration.success, registration.message
        ));

        let base = self.session.work_dir.join("register");
        match on_hold(
            &mut self.tel,
            self.services.synthesize(&registration.message, &base),
        )
        .await?
        {
            Some(prompt) => self.tel.playback(&prompt.display().to_string()).await?,
            None => {
                self.tel
                    .playback(&self.prompts.registration_fallback)
                    .await?
            }
        }

        if !registration.success && self.collection.register_failure == RegisterFailurePolicy::Operator {
            return Ok(Step::Transfer(TransferReason::RegistrationFailed));
        }
        Ok(Step::Done(CallOutcome::Registered {
            success: registration.success,
        }))
    }

    fn save(&self, stage: Stage, captured: &Captured) {
        self.store_field(stage.key(), FieldValue::Text(captured.text.clone()));
        if let (Some(key), Some(location)) = (stage.location_key(), &captured.location) {
            match serde_json::to_value(location) {
                Ok(value) => self.store_field(key, FieldValue::Structured(value)),
                Err(e) => tracing::error!(key, "Cannot encode location: {e}"),
            }
        }
    }

    fn store_field(&self, key: &str, value: FieldValue) {
        if let Err(e) = self.store.set_field(key, value) {
            tracing::error!(call_id = %self.session.id, key, "Progress write failed: {e}");
            self.audit.record(format!("Error saving {key}: {e}"));
        }
    }
}

/// Serve one call on an AGI channel: read the environment, resolve the
/// tenant, and run the flow against the production services.
pub async fn handle_call<R, W>(reader: R, writer: W, config: &Config) -> Result<CallOutcome, AgiError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (channel, env) = AgiSession::start(reader, writer).await?;
    let session = CallSession::from_env(&env, &config.paths.work_root);

    let tenant = match config::load_tenant(&config.paths.tenants, &session.extension) {
        Ok(tenant) => tenant,
        Err(e) => {
            tracing::error!(call_id = %session.id, "Tenant unavailable, services disabled: {e}");
            Tenant::default()
        }
    };

    let services = HttpServices::new(config, &tenant, session.id.clone());
    Ok(CallFlow::new(channel, services, session, config, &tenant)
        .run()
        .await)
}
