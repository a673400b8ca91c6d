use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use clinidesk_core::poll::{fetch_summary_status, request_summary};
use clinidesk_core::{
    ApiGateway, AppContext, Config, Consultation, FieldSet, Patient, PollEvent, Resource,
    ResourceList, ResourcePage, SessionStore, SummaryPoller,
};

use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Patients,
    Consultations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Which form keystrokes go to while editing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Login,
    Filters,
    Create,
}

/// Results of background requests, delivered through the event channel
#[derive(Debug)]
pub enum NetEvent {
    LoggedIn { ok: bool },
    PatientsLoaded(Option<ResourcePage<Patient>>),
    ConsultationsLoaded(Option<ResourcePage<Consultation>>),
    PatientCreated(Option<Patient>),
    ConsultationCreated(Option<Consultation>),
    SummaryRequested { consultation_id: i64, ok: bool },
    SummaryStatus { generation: u64, status: Option<String> },
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,
    pub form: FormKind,
    pub field_idx: usize,

    // Login state
    pub login_form: FieldSet,
    pub login_pending: bool,

    // Resource lists
    pub patients: ResourceList<Patient>,
    pub patients_state: ListState,
    pub consultations: ResourceList<Consultation>,
    pub consultations_state: ListState,

    // Summary polling
    pub poller: SummaryPoller<AppEvent>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Panel areas for mouse hit-testing (updated during render)
    pub list_area: Option<Rect>,
    pub dialog_area: Option<Rect>,

    // Services
    pub ctx: AppContext,
    pub gateway: ApiGateway,
    pub session: SessionStore,
    tx: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        config: &Config,
        gateway: ApiGateway,
        session: SessionStore,
        tx: UnboundedSender<AppEvent>,
    ) -> Self {
        let poller = SummaryPoller::new(config.poll_interval(), config.refresh_close_delay(), tx.clone());

        Self {
            should_quit: false,
            screen: Screen::Login,
            input_mode: InputMode::Editing,
            form: FormKind::Login,
            field_idx: 0,

            login_form: FieldSet::new(&[("username", "Username"), ("password", "Password")]),
            login_pending: false,

            patients: ResourceList::new(),
            patients_state: ListState::default(),
            consultations: ResourceList::new(),
            consultations_state: ListState::default(),

            poller,

            animation_frame: 0,

            list_area: None,
            dialog_area: None,

            ctx: gateway.context().clone(),
            gateway,
            session,
            tx,
        }
    }

    /// Pick up a saved session, if any, and show the patient list
    pub fn start(&mut self) {
        if self.session.restore().is_some() {
            self.enter_workspace();
        }
    }

    fn enter_workspace(&mut self) {
        self.screen = Screen::Patients;
        self.input_mode = InputMode::Normal;
        self.field_idx = 0;
        self.load_patients(1);
        self.load_consultations(1);
    }

    fn send(tx: &UnboundedSender<AppEvent>, event: NetEvent) {
        // The receiver only goes away when the app is shutting down
        let _ = tx.send(AppEvent::Net(event));
    }

    // Login
    pub fn submit_login(&mut self) {
        if self.login_pending {
            return;
        }
        let username = self.login_form.get("username").unwrap_or_default().trim().to_string();
        let password = self.login_form.get("password").unwrap_or_default().to_string();
        if username.is_empty() || password.is_empty() {
            self.ctx.publish_error("Enter a username and password");
            return;
        }

        self.login_pending = true;
        let gateway = self.gateway.clone();
        let session = self.session.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let ok = session.login(&gateway, &username, &password).await.is_ok();
            Self::send(&tx, NetEvent::LoggedIn { ok });
        });
    }

    pub fn on_logged_in(&mut self, ok: bool) {
        self.login_pending = false;
        self.login_form.set("password", "");
        if ok && self.screen == Screen::Login {
            self.enter_workspace();
        }
    }

    /// Forget the session and everything fetched with it
    pub fn logout(&mut self) {
        self.poller.shutdown();
        self.session.logout();
        self.patients.reset();
        self.consultations.reset();
        self.patients_state.select(None);
        self.consultations_state.select(None);
        self.login_form.clear();
        self.login_pending = false;

        self.screen = Screen::Login;
        self.input_mode = InputMode::Editing;
        self.form = FormKind::Login;
        self.field_idx = 0;
        self.ctx.publish_info("Logged out");
    }

    pub fn shutdown(&mut self) {
        self.poller.shutdown();
    }

    // Lists
    pub fn load_patients(&self, page_number: u32) {
        let path = self.patients.list_path(page_number);
        let gateway = self.gateway.clone();
        let tx = self.tx.clone();
        debug!(%path, "loading patients");
        tokio::spawn(async move {
            let page = ResourceList::<Patient>::fetch(&gateway, &path, page_number).await;
            Self::send(&tx, NetEvent::PatientsLoaded(page));
        });
    }

    pub fn load_consultations(&self, page_number: u32) {
        let path = self.consultations.list_path(page_number);
        let gateway = self.gateway.clone();
        let tx = self.tx.clone();
        debug!(%path, "loading consultations");
        tokio::spawn(async move {
            let page = ResourceList::<Consultation>::fetch(&gateway, &path, page_number).await;
            Self::send(&tx, NetEvent::ConsultationsLoaded(page));
        });
    }

    pub fn reload_current(&self) {
        match self.screen {
            Screen::Patients => self.load_patients(self.patients.page.page_number),
            Screen::Consultations => self.load_consultations(self.consultations.page.page_number),
            Screen::Login => {}
        }
    }

    pub fn next_page(&self) {
        match self.screen {
            Screen::Patients => {
                if let Some(page) = self.patients.next_page() {
                    self.load_patients(page);
                }
            }
            Screen::Consultations => {
                if let Some(page) = self.consultations.next_page() {
                    self.load_consultations(page);
                }
            }
            Screen::Login => {}
        }
    }

    pub fn previous_page(&self) {
        match self.screen {
            Screen::Patients => {
                if let Some(page) = self.patients.previous_page() {
                    self.load_patients(page);
                }
            }
            Screen::Consultations => {
                if let Some(page) = self.consultations.previous_page() {
                    self.load_consultations(page);
                }
            }
            Screen::Login => {}
        }
    }

    pub fn on_patients_loaded(&mut self, page: Option<ResourcePage<Patient>>) {
        // A load that lands after logout is dropped
        let (Some(page), true) = (page, self.session.is_logged_in()) else {
            return;
        };
        self.patients.apply_page(page);
        clamp_selection(&mut self.patients_state, self.patients.items().len());
    }

    pub fn on_consultations_loaded(&mut self, page: Option<ResourcePage<Consultation>>) {
        let (Some(page), true) = (page, self.session.is_logged_in()) else {
            return;
        };
        self.consultations.apply_page(page);
        clamp_selection(&mut self.consultations_state, self.consultations.items().len());
    }

    // Creation
    pub fn submit_create(&self) {
        let gateway = self.gateway.clone();
        let tx = self.tx.clone();
        match self.screen {
            Screen::Patients => {
                let body = self.patients.create_body();
                tokio::spawn(async move {
                    let created = ResourceList::<Patient>::submit(&gateway, &body).await;
                    Self::send(&tx, NetEvent::PatientCreated(created));
                });
            }
            Screen::Consultations => {
                let body = self.consultations.create_body();
                tokio::spawn(async move {
                    let created = ResourceList::<Consultation>::submit(&gateway, &body).await;
                    Self::send(&tx, NetEvent::ConsultationCreated(created));
                });
            }
            Screen::Login => {}
        }
    }

    pub fn on_patient_created(&mut self, created: Option<Patient>) {
        // A create that lands after logout must not repopulate the cleared list
        let (Some(patient), true) = (created, self.session.is_logged_in()) else {
            return;
        };
        info!(id = patient.id, "patient created");
        self.ctx.publish_info(format!("{} #{} created", Patient::LABEL, patient.id));
        self.patients.apply_created(patient);
        self.patients_state.select(Some(0));
    }

    pub fn on_consultation_created(&mut self, created: Option<Consultation>) {
        let (Some(consultation), true) = (created, self.session.is_logged_in()) else {
            return;
        };
        info!(id = consultation.id, "consultation created");
        self.ctx.publish_info(format!("{} #{} created", Consultation::LABEL, consultation.id));
        self.consultations.apply_created(consultation);
        self.consultations_state.select(Some(0));
    }

    // Summary generation
    pub fn generate_summary(&self) {
        let Some(consultation_id) = self.selected_consultation().map(|c| c.id) else {
            self.ctx.publish_error("Select a consultation first");
            return;
        };

        let gateway = self.gateway.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let ok = request_summary(&gateway, consultation_id).await;
            Self::send(&tx, NetEvent::SummaryRequested { consultation_id, ok });
        });
    }

    pub fn on_summary_requested(&mut self, consultation_id: i64, ok: bool) {
        if ok && self.session.is_logged_in() {
            self.poller.start(consultation_id);
        }
    }

    pub fn on_poll_event(&mut self, event: PollEvent) {
        let Some(consultation_id) = self.poller.handle(event) else {
            return;
        };
        let PollEvent::Tick { generation } = event else {
            return;
        };

        let gateway = self.gateway.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let status = fetch_summary_status(&gateway, consultation_id).await;
            Self::send(&tx, NetEvent::SummaryStatus { generation, status });
        });
    }

    pub fn on_summary_status(&mut self, generation: u64, status: Option<String>) {
        if self.poller.on_status(generation, status.as_deref()) {
            self.load_consultations(self.consultations.page.page_number);
        }
    }

    pub fn dismiss_summary(&mut self) {
        self.poller.dismiss();
        self.dialog_area = None;
    }

    pub fn dialog_visible(&self) -> bool {
        self.poller.dialog().visible
    }

    // Forms
    pub fn begin_editing(&mut self, form: FormKind) {
        if self.screen == Screen::Login {
            return;
        }
        self.form = form;
        self.field_idx = 0;
        self.input_mode = InputMode::Editing;
    }

    pub fn stop_editing(&mut self) {
        if self.screen != Screen::Login {
            self.input_mode = InputMode::Normal;
        }
    }

    pub fn active_form(&self) -> &FieldSet {
        match (self.form, self.screen) {
            (FormKind::Login, _) | (_, Screen::Login) => &self.login_form,
            (FormKind::Filters, Screen::Patients) => &self.patients.filters,
            (FormKind::Create, Screen::Patients) => &self.patients.draft,
            (FormKind::Filters, Screen::Consultations) => &self.consultations.filters,
            (FormKind::Create, Screen::Consultations) => &self.consultations.draft,
        }
    }

    fn active_form_mut(&mut self) -> &mut FieldSet {
        match (self.form, self.screen) {
            (FormKind::Login, _) | (_, Screen::Login) => &mut self.login_form,
            (FormKind::Filters, Screen::Patients) => &mut self.patients.filters,
            (FormKind::Create, Screen::Patients) => &mut self.patients.draft,
            (FormKind::Filters, Screen::Consultations) => &mut self.consultations.filters,
            (FormKind::Create, Screen::Consultations) => &mut self.consultations.draft,
        }
    }

    pub fn next_field(&mut self) {
        let len = self.active_form().len();
        if len > 0 {
            self.field_idx = (self.field_idx + 1) % len;
        }
    }

    pub fn prev_field(&mut self) {
        let len = self.active_form().len();
        if len > 0 {
            self.field_idx = (self.field_idx + len - 1) % len;
        }
    }

    pub fn insert_char(&mut self, c: char) {
        let idx = self.field_idx;
        if let Some(value) = self.active_form_mut().value_mut(idx) {
            value.push(c);
        }
    }

    pub fn delete_char(&mut self) {
        let idx = self.field_idx;
        if let Some(value) = self.active_form_mut().value_mut(idx) {
            value.pop();
        }
    }

    /// Enter on a form: log in, apply filters, or submit the draft
    pub fn submit_form(&mut self) {
        match (self.screen, self.form) {
            (Screen::Login, _) | (_, FormKind::Login) => self.submit_login(),
            (Screen::Patients, FormKind::Filters) => {
                self.stop_editing();
                self.load_patients(1);
            }
            (Screen::Consultations, FormKind::Filters) => {
                self.stop_editing();
                self.load_consultations(1);
            }
            (_, FormKind::Create) => {
                self.stop_editing();
                self.submit_create();
            }
        }
    }

    // Navigation
    pub fn switch_screen(&mut self, screen: Screen) {
        if self.screen != Screen::Login && screen != Screen::Login {
            self.screen = screen;
            self.input_mode = InputMode::Normal;
        }
    }

    pub fn toggle_screen(&mut self) {
        match self.screen {
            Screen::Patients => self.switch_screen(Screen::Consultations),
            Screen::Consultations => self.switch_screen(Screen::Patients),
            Screen::Login => {}
        }
    }

    fn current_list(&mut self) -> Option<(&mut ListState, usize)> {
        match self.screen {
            Screen::Patients => Some((&mut self.patients_state, self.patients.page.items.len())),
            Screen::Consultations => {
                Some((&mut self.consultations_state, self.consultations.page.items.len()))
            }
            Screen::Login => None,
        }
    }

    pub fn select_next(&mut self) {
        if let Some((state, len)) = self.current_list() {
            if len > 0 {
                let i = state.selected().map_or(0, |i| (i + 1).min(len - 1));
                state.select(Some(i));
            }
        }
    }

    pub fn select_prev(&mut self) {
        if let Some((state, len)) = self.current_list() {
            if len > 0 {
                let i = state.selected().unwrap_or(0);
                state.select(Some(i.saturating_sub(1)));
            }
        }
    }

    pub fn select_first(&mut self) {
        if let Some((state, len)) = self.current_list() {
            if len > 0 {
                state.select(Some(0));
            }
        }
    }

    pub fn select_last(&mut self) {
        if let Some((state, len)) = self.current_list() {
            if len > 0 {
                state.select(Some(len - 1));
            }
        }
    }

    pub fn selected_patient(&self) -> Option<&Patient> {
        self.patients_state.selected().and_then(|i| self.patients.items().get(i))
    }

    pub fn selected_consultation(&self) -> Option<&Consultation> {
        self.consultations_state.selected().and_then(|i| self.consultations.items().get(i))
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.dialog_visible() || self.login_pending {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

fn clamp_selection(state: &mut ListState, len: usize) {
    if len == 0 {
        state.select(None);
    } else {
        let i = state.selected().unwrap_or(0).min(len - 1);
        state.select(Some(i));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use clinidesk_core::{CredentialPair, PollState, TokenStore};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    pub(crate) fn test_app(dir: &tempfile::TempDir) -> (App, UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = Config::new();
        let ctx = AppContext::new();
        // Nothing listens on port 1, so background requests fail fast
        let gateway = ApiGateway::new("http://127.0.0.1:1", ctx.clone());
        let store = TokenStore::new(
            dir.path().join("session.json"),
            config.access_token_ttl(),
            config.refresh_token_ttl(),
        );
        let session = SessionStore::new(ctx, store);
        (App::new(&config, gateway, session, tx), rx)
    }

    pub(crate) fn logged_in_app(dir: &tempfile::TempDir) -> (App, UnboundedReceiver<AppEvent>) {
        let config = Config::new();
        let store = TokenStore::new(
            dir.path().join("session.json"),
            config.access_token_ttl(),
            config.refresh_token_ttl(),
        );
        store
            .save(&CredentialPair {
                access_token: "acc".into(),
                refresh_token: "ref".into(),
            })
            .unwrap();
        let (mut app, rx) = test_app(dir);
        app.start();
        (app, rx)
    }

    fn patient(id: i64) -> Patient {
        Patient {
            id,
            full_name: format!("Patient {}", id),
            date_of_birth: None,
            email: None,
        }
    }

    fn consultation(id: i64) -> Consultation {
        Consultation {
            id,
            patient: None,
            symptoms: "cough".into(),
            diagnosis: "cold".into(),
            summary: None,
            summary_status: None,
            created_at: None,
        }
    }

    /// Count consultation page loads reported on the channel within `window`
    async fn consultation_loads(rx: &mut UnboundedReceiver<AppEvent>, window: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + window;
        let mut loads = 0;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            if matches!(event, AppEvent::Net(NetEvent::ConsultationsLoaded(_))) {
                loads += 1;
            }
        }
        loads
    }

    fn polling_generation(app: &App) -> u64 {
        match app.poller.state() {
            PollState::Polling { generation, .. } => generation,
            other => panic!("expected polling, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_starts_on_login_without_saved_session() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = test_app(&dir);
        app.start();
        assert_eq!(app.screen, Screen::Login);
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[tokio::test]
    async fn test_restored_session_opens_patients() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _rx) = logged_in_app(&dir);
        assert_eq!(app.screen, Screen::Patients);
        assert_eq!(app.input_mode, InputMode::Normal);
    }

    #[tokio::test]
    async fn test_failed_login_stays_on_login_screen() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = test_app(&dir);
        app.login_form.set("username", "doc");
        app.login_form.set("password", "bad");

        app.on_logged_in(false);
        assert_eq!(app.screen, Screen::Login);
        assert_eq!(app.login_form.get("username"), Some("doc"));
        assert_eq!(app.login_form.get("password"), Some(""));
    }

    #[tokio::test]
    async fn test_login_requires_both_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = test_app(&dir);
        app.login_form.set("username", "doc");
        app.submit_login();
        assert!(!app.login_pending);
        assert!(app.ctx.status().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_lists_and_cancels_poll() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);

        app.on_patients_loaded(Some(ResourcePage {
            items: vec![patient(1), patient(2)],
            total_count: 2,
            has_next: false,
            has_previous: false,
            page_number: 1,
        }));
        app.consultations.filters.set("patient_id", "1");
        app.on_summary_requested(42, true);
        assert!(matches!(app.poller.state(), PollState::Polling { consultation_id: 42, .. }));

        app.logout();

        assert!(app.poller.is_idle());
        assert!(!app.dialog_visible());
        assert!(app.patients.items().is_empty());
        assert!(app.consultations.items().is_empty());
        assert_eq!(app.consultations.filters.get("patient_id"), Some(""));
        assert!(!app.session.is_logged_in());
        assert!(!dir.path().join("session.json").exists());
        assert_eq!(app.screen, Screen::Login);
    }

    #[tokio::test]
    async fn test_late_page_after_logout_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);
        app.logout();

        app.on_patients_loaded(Some(ResourcePage {
            items: vec![patient(1)],
            total_count: 1,
            has_next: false,
            has_previous: false,
            page_number: 1,
        }));
        assert!(app.patients.items().is_empty());
    }

    #[tokio::test]
    async fn test_late_create_after_logout_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);
        app.logout();

        app.on_patient_created(Some(patient(5)));
        app.on_consultation_created(Some(consultation(9)));

        assert!(app.patients.items().is_empty());
        assert_eq!(app.patients.page.total_count, 0);
        assert!(app.consultations.items().is_empty());
        assert_eq!(app.ctx.status().map(|s| s.text).as_deref(), Some("Logged out"));
    }

    #[tokio::test]
    async fn test_created_patient_goes_first() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);
        app.on_patients_loaded(Some(ResourcePage {
            items: vec![patient(1)],
            total_count: 1,
            has_next: false,
            has_previous: false,
            page_number: 1,
        }));
        app.patients.draft.set("full_name", "Patient 5");

        app.on_patient_created(Some(patient(5)));
        assert_eq!(app.selected_patient().map(|p| p.id), Some(5));
        assert_eq!(app.patients.draft.get("full_name"), Some(""));

        // a failed create leaves the draft for correction
        app.patients.draft.set("full_name", "Typo");
        app.on_patient_created(None);
        assert_eq!(app.patients.draft.get("full_name"), Some("Typo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_summary_request_does_not_poll() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);
        app.on_summary_requested(7, false);
        assert!(app.poller.is_idle());
    }

    #[tokio::test]
    async fn test_form_editing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);
        app.begin_editing(FormKind::Filters);
        app.next_field();
        for c in "a@b.com".chars() {
            app.insert_char(c);
        }
        app.delete_char();
        assert_eq!(app.patients.filters.get("email"), Some("a@b.co"));

        app.prev_field();
        app.prev_field();
        assert_eq!(app.field_idx, 3);
    }

    #[tokio::test]
    async fn test_terminal_status_reloads_consultations() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, mut rx) = logged_in_app(&dir);
        // the startup load
        assert_eq!(consultation_loads(&mut rx, Duration::from_secs(1)).await, 1);

        app.on_summary_requested(42, true);
        let generation = polling_generation(&app);
        app.on_poll_event(PollEvent::Tick { generation });

        app.on_summary_status(generation, Some("processing".into()));
        assert!(matches!(app.poller.state(), PollState::Polling { consultation_id: 42, .. }));

        app.on_summary_status(generation, Some("done".into()));
        assert!(matches!(app.poller.state(), PollState::Ready { consultation_id: 42, .. }));
        assert!(app.dialog_visible());
        assert_eq!(consultation_loads(&mut rx, Duration::from_secs(1)).await, 1);
    }

    #[tokio::test]
    async fn test_status_after_dismiss_does_not_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, mut rx) = logged_in_app(&dir);
        assert_eq!(consultation_loads(&mut rx, Duration::from_secs(1)).await, 1);

        app.on_summary_requested(42, true);
        let generation = polling_generation(&app);
        app.on_poll_event(PollEvent::Tick { generation });
        app.dismiss_summary();

        app.on_summary_status(generation, Some("done".into()));
        assert!(app.poller.is_idle());
        assert!(!app.dialog_visible());
        assert_eq!(consultation_loads(&mut rx, Duration::from_millis(500)).await, 0);
    }
}
