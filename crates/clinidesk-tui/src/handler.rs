use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, FormKind, InputMode, NetEvent, Screen};
use crate::tui::AppEvent;

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
        AppEvent::Poll(event) => app.on_poll_event(event),
        AppEvent::Net(event) => handle_net(app, event),
    }
}

fn handle_net(app: &mut App, event: NetEvent) {
    match event {
        NetEvent::LoggedIn { ok } => app.on_logged_in(ok),
        NetEvent::PatientsLoaded(page) => app.on_patients_loaded(page),
        NetEvent::ConsultationsLoaded(page) => app.on_consultations_loaded(page),
        NetEvent::PatientCreated(created) => app.on_patient_created(created),
        NetEvent::ConsultationCreated(created) => app.on_consultation_created(created),
        NetEvent::SummaryRequested { consultation_id, ok } => {
            app.on_summary_requested(consultation_id, ok)
        }
        NetEvent::SummaryStatus { generation, status } => app.on_summary_status(generation, status),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    // The summary dialog is modal
    if app.dialog_visible() {
        match key.code {
            KeyCode::Esc | KeyCode::Char('x') => app.dismiss_summary(),
            KeyCode::Char('q') => app.should_quit = true,
            _ => {}
        }
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
        KeyCode::Char('k') | KeyCode::Up => app.select_prev(),
        KeyCode::Char('g') => app.select_first(),
        KeyCode::Char('G') => app.select_last(),

        // Paging
        KeyCode::Char('n') | KeyCode::Right => app.next_page(),
        KeyCode::Char('p') | KeyCode::Left => app.previous_page(),
        KeyCode::Char('r') => app.reload_current(),

        // Forms
        KeyCode::Char('f') | KeyCode::Char('/') => app.begin_editing(FormKind::Filters),
        KeyCode::Char('c') => app.begin_editing(FormKind::Create),

        // Summary (consultations only)
        KeyCode::Char('s') if app.screen == Screen::Consultations => app.generate_summary(),

        // Screen switching
        KeyCode::Tab => app.toggle_screen(),
        KeyCode::Char('1') => app.switch_screen(Screen::Patients),
        KeyCode::Char('2') => app.switch_screen(Screen::Consultations),

        KeyCode::Char('L') => app.logout(),

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.stop_editing(),
        KeyCode::Enter => app.submit_form(),
        KeyCode::Tab | KeyCode::Down => app.next_field(),
        KeyCode::BackTab | KeyCode::Up => app.prev_field(),
        KeyCode::Backspace => app.delete_char(),
        KeyCode::Char(c) => app.insert_char(c),
        _ => {}
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let (x, y) = (mouse.column, mouse.row);

    if app.dialog_visible() {
        // Clicking anywhere outside the dialog closes it
        if let MouseEventKind::Down(MouseButton::Left) = mouse.kind {
            let inside = app.dialog_area.map_or(false, |area| point_in_rect(x, y, area));
            if !inside {
                app.dismiss_summary();
            }
        }
        return;
    }

    let over_list = app.list_area.map_or(false, |area| point_in_rect(x, y, area));
    if !over_list {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.select_next(),
        MouseEventKind::ScrollUp => app.select_prev(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::logged_in_app;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: crossterm::event::KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn click(column: u16, row: u16) -> AppEvent {
        AppEvent::Mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_escape_dismisses_summary_dialog() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);
        app.on_summary_requested(42, true);
        assert!(app.dialog_visible());

        // other keys are swallowed while the dialog is up
        handle_event(&mut app, key(KeyCode::Char('L')));
        assert!(app.session.is_logged_in());

        handle_event(&mut app, key(KeyCode::Esc));
        assert!(!app.dialog_visible());
        assert!(app.poller.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_outside_dismisses_summary_dialog() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);
        app.on_summary_requested(42, true);
        app.dialog_area = Some(Rect::new(20, 10, 40, 7));

        handle_event(&mut app, click(25, 12));
        assert!(app.dialog_visible());

        handle_event(&mut app, click(2, 2));
        assert!(!app.dialog_visible());
    }

    #[tokio::test]
    async fn test_filter_form_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);

        handle_event(&mut app, key(KeyCode::Char('f')));
        assert_eq!(app.input_mode, InputMode::Editing);
        handle_event(&mut app, key(KeyCode::Tab));
        for c in "a@b.com".chars() {
            handle_event(&mut app, key(KeyCode::Char(c)));
        }
        handle_event(&mut app, key(KeyCode::Enter));

        assert_eq!(app.input_mode, InputMode::Normal);
        assert_eq!(app.patients.filters.get("email"), Some("a@b.com"));
        assert_eq!(app.patients.list_path(1), "/patients/?page=1&email=a%40b.com");
    }

    #[tokio::test]
    async fn test_logout_key_returns_to_login() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = logged_in_app(&dir);
        handle_event(&mut app, key(KeyCode::Char('L')));
        assert_eq!(app.screen, Screen::Login);
        assert_eq!(app.input_mode, InputMode::Editing);

        // typing on the login screen goes into the username field
        handle_event(&mut app, key(KeyCode::Char('q')));
        assert!(!app.should_quit);
        assert_eq!(app.login_form.get("username"), Some("q"));
    }

    #[test]
    fn test_point_in_rect() {
        let rect = Rect::new(10, 5, 20, 4);
        assert!(point_in_rect(10, 5, rect));
        assert!(point_in_rect(29, 8, rect));
        assert!(!point_in_rect(30, 8, rect));
        assert!(!point_in_rect(9, 5, rect));
        assert!(!point_in_rect(12, 9, rect));
    }
}
