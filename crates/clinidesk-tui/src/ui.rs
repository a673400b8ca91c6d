use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use clinidesk_core::{Consultation, FieldSet, Patient, ResourcePage, StatusLevel};
use crate::app::{App, FormKind, InputMode, Screen};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, status line, key hints
    let [header_area, body_area, status_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.screen {
        Screen::Login => render_login_screen(app, frame, body_area),
        Screen::Patients => render_patients_screen(app, frame, body_area),
        Screen::Consultations => render_consultations_screen(app, frame, body_area),
    }

    render_status(app, frame, status_area);
    render_footer(app, frame, footer_area);

    if app.dialog_visible() {
        render_summary_dialog(app, frame, area);
    } else {
        app.dialog_area = None;
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let session = if app.session.is_logged_in() {
        Span::styled(" signed in ", Style::default().fg(Color::Green))
    } else {
        Span::styled(" signed out ", Style::default().fg(Color::Gray))
    };

    let tabs: Vec<Span> = [(Screen::Patients, " 1 Patients "), (Screen::Consultations, " 2 Consultations ")]
        .into_iter()
        .filter(|_| app.screen != Screen::Login)
        .map(|(screen, label)| {
            if screen == app.screen {
                Span::styled(label, Style::default().fg(Color::Black).bg(Color::Cyan).bold())
            } else {
                Span::styled(label, Style::default().fg(Color::White))
            }
        })
        .collect();

    let mut spans = vec![Span::styled(" clinidesk ", Style::default().fg(Color::Cyan).bold())];
    spans.extend(tabs);
    spans.push(session);
    spans.push(Span::styled(
        format!("v{}", env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::Gray),
    ));

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_status(app: &App, frame: &mut Frame, area: Rect) {
    let line = match app.ctx.status() {
        Some(status) => {
            let style = match status.level {
                StatusLevel::Error => Style::default().fg(Color::Red),
                StatusLevel::Info => Style::default().fg(Color::Green),
            };
            Line::from(Span::styled(format!(" {}", status.text), style))
        }
        None => Line::from(""),
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match (app.screen, app.input_mode, app.form) {
        (Screen::Login, _, _) => " LOGIN ",
        (_, InputMode::Normal, _) => " LIST ",
        (_, InputMode::Editing, FormKind::Filters) => " FILTER ",
        (_, InputMode::Editing, _) => " NEW ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().fg(Color::White);

    let hints: Vec<(&str, &str)> = if app.dialog_visible() {
        vec![("Esc", "close"), ("q", "quit")]
    } else {
        match (app.screen, app.input_mode) {
            (Screen::Login, _) => vec![("Tab", "field"), ("Enter", "sign in"), ("^C", "quit")],
            (_, InputMode::Editing) => {
                vec![("Tab", "field"), ("Enter", "submit"), ("Esc", "back")]
            }
            (Screen::Consultations, InputMode::Normal) => vec![
                ("j/k", "move"),
                ("n/p", "page"),
                ("f", "filter"),
                ("c", "new"),
                ("s", "summary"),
                ("r", "reload"),
                ("Tab", "patients"),
                ("L", "logout"),
                ("q", "quit"),
            ],
            (_, InputMode::Normal) => vec![
                ("j/k", "move"),
                ("n/p", "page"),
                ("f", "filter"),
                ("c", "new"),
                ("r", "reload"),
                ("Tab", "consultations"),
                ("L", "logout"),
                ("q", "quit"),
            ],
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {}  ", label), label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_login_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let popup_width = 50.min(area.width.saturating_sub(4));
    let popup_height = 8.min(area.height);
    let popup_x = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = area.y + (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    let title = if app.login_pending {
        format!(" Signing in{} ", ".".repeat(app.animation_frame as usize + 1))
    } else {
        " Sign in ".to_string()
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(title);

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    // Mask the password with asterisks
    let mut masked = app.login_form.clone();
    let password_len = masked.get("password").map_or(0, |p| p.chars().count());
    masked.set("password", "*".repeat(password_len));

    render_fields(frame, inner, &masked, Some(app.field_idx));
}

/// Draw a field set as `label: value` rows, one row gap between fields.
/// Places the cursor at the end of the active field when there is one.
fn render_fields(frame: &mut Frame, area: Rect, fields: &FieldSet, active: Option<usize>) {
    let label_width = fields
        .fields()
        .iter()
        .map(|f| f.label.chars().count())
        .max()
        .unwrap_or(0) as u16
        + 2;

    for (i, field) in fields.fields().iter().enumerate() {
        let y = area.y + (i as u16) * 2;
        if y >= area.y + area.height {
            break;
        }

        let is_active = active == Some(i);
        let label_style = if is_active {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };

        let line = Line::from(vec![
            Span::styled(format!("{:<width$}", format!("{}:", field.label), width = label_width as usize), label_style),
            Span::styled(field.value.clone(), Style::default().fg(Color::Cyan)),
        ]);
        frame.render_widget(Paragraph::new(line), Rect::new(area.x, y, area.width, 1));

        if is_active {
            let cursor_x = (label_width as usize + field.value.chars().count()).min(area.width as usize) as u16;
            frame.set_cursor_position((area.x + cursor_x, y));
        }
    }
}

fn page_title<R>(label: &str, page: &ResourcePage<R>) -> String {
    let mut title = format!(" {} - page {} ({} total)", label, page.page_number, page.total_count);
    if page.has_previous {
        title.push_str(" <p");
    }
    if page.has_next {
        title.push_str(" n>");
    }
    title.push(' ');
    title
}

fn list_highlight() -> Style {
    Style::default()
        .bg(Color::Blue)
        .fg(Color::White)
        .add_modifier(Modifier::BOLD)
}

/// Split the body into the list (left) and the side panel (right)
fn split_body(area: Rect) -> [Rect; 2] {
    Layout::horizontal([Constraint::Percentage(55), Constraint::Percentage(45)]).areas(area)
}

fn render_patients_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [list_area, side_area] = split_body(area);

    let items: Vec<ListItem> = app
        .patients
        .items()
        .iter()
        .map(|p| ListItem::new(patient_line(p)))
        .collect();

    let empty = items.is_empty();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(page_title("Patients", &app.patients.page));

    app.list_area = Some(list_area);
    if empty {
        let hint = Paragraph::new("No patients on this page.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(hint, list_area);
    } else {
        let list = List::new(items)
            .block(block)
            .highlight_style(list_highlight())
            .highlight_symbol("> ");
        frame.render_stateful_widget(list, list_area, &mut app.patients_state);
    }

    let [filters_area, draft_area] =
        Layout::vertical([Constraint::Length(10), Constraint::Min(0)]).areas(side_area);
    let editing = app.input_mode == InputMode::Editing;
    render_form_block(
        frame,
        filters_area,
        " Filters (f) ",
        &app.patients.filters,
        (editing && app.form == FormKind::Filters).then_some(app.field_idx),
    );
    render_form_block(
        frame,
        draft_area,
        " New patient (c) ",
        &app.patients.draft,
        (editing && app.form == FormKind::Create).then_some(app.field_idx),
    );
}

fn patient_line(p: &Patient) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("#{:<5}", p.id), Style::default().fg(Color::DarkGray)),
        Span::raw(p.full_name.clone()),
        Span::styled(
            format!("  {}", p.date_of_birth.as_deref().unwrap_or("-")),
            Style::default().fg(Color::Gray),
        ),
        Span::styled(
            format!("  {}", p.email.as_deref().unwrap_or("")),
            Style::default().fg(Color::Gray),
        ),
    ])
}

fn render_consultations_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [left_area, side_area] = split_body(area);
    let [list_area, detail_area] =
        Layout::vertical([Constraint::Percentage(60), Constraint::Percentage(40)]).areas(left_area);

    let items: Vec<ListItem> = app
        .consultations
        .items()
        .iter()
        .map(|c| ListItem::new(consultation_line(c)))
        .collect();

    let empty = items.is_empty();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(page_title("Consultations", &app.consultations.page));

    app.list_area = Some(list_area);
    if empty {
        let hint = Paragraph::new("No consultations on this page.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(hint, list_area);
    } else {
        let list = List::new(items)
            .block(block)
            .highlight_style(list_highlight())
            .highlight_symbol("> ");
        frame.render_stateful_widget(list, list_area, &mut app.consultations_state);
    }

    render_consultation_detail(app.selected_consultation(), frame, detail_area);

    let [filters_area, draft_area] =
        Layout::vertical([Constraint::Length(8), Constraint::Min(0)]).areas(side_area);
    let editing = app.input_mode == InputMode::Editing;
    render_form_block(
        frame,
        filters_area,
        " Filters (f) ",
        &app.consultations.filters,
        (editing && app.form == FormKind::Filters).then_some(app.field_idx),
    );
    render_form_block(
        frame,
        draft_area,
        " New consultation (c) ",
        &app.consultations.draft,
        (editing && app.form == FormKind::Create).then_some(app.field_idx),
    );
}

fn consultation_line(c: &Consultation) -> Line<'static> {
    let patient = c.patient.as_ref().map(|p| p.to_string()).unwrap_or_default();
    let marker = if c.summary.as_deref().is_some_and(|s| !s.is_empty()) {
        Span::styled(" [summary]", Style::default().fg(Color::Green))
    } else {
        Span::raw("")
    };

    Line::from(vec![
        Span::styled(format!("#{:<5}", c.id), Style::default().fg(Color::DarkGray)),
        Span::raw(format!("{:<18}", patient)),
        Span::styled(
            c.created_at.as_deref().unwrap_or("").chars().take(10).collect::<String>(),
            Style::default().fg(Color::Gray),
        ),
        marker,
    ])
}

fn render_consultation_detail(selected: Option<&Consultation>, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Details ");

    let Some(c) = selected else {
        let hint = Paragraph::new("Select a consultation to see its details.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(hint, area);
        return;
    };

    let heading = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let summary = match (c.summary.as_deref(), c.summary_status.as_deref()) {
        (Some(s), _) if !s.is_empty() => s.to_string(),
        (_, Some(status)) => format!("({})", status),
        _ => "No summary yet. Press s to generate one.".to_string(),
    };

    let lines = vec![
        Line::from(Span::styled("Symptoms", heading)),
        Line::from(c.symptoms.clone()),
        Line::from(""),
        Line::from(Span::styled("Diagnosis", heading)),
        Line::from(c.diagnosis.clone()),
        Line::from(""),
        Line::from(Span::styled("Summary", heading)),
        Line::from(summary),
    ];

    let detail = Paragraph::new(lines).wrap(Wrap { trim: true }).block(block);
    frame.render_widget(detail, area);
}

fn render_form_block(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    fields: &FieldSet,
    active: Option<usize>,
) {
    let border = if active.is_some() { Color::Yellow } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title.to_string());

    let inner = block.inner(area);
    frame.render_widget(block, area);
    render_fields(frame, inner, fields, active);
}

fn render_summary_dialog(app: &mut App, frame: &mut Frame, area: Rect) {
    let popup_width = 56.min(area.width.saturating_sub(4));
    let popup_height = 7.min(area.height);
    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);
    app.dialog_area = Some(popup_area);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let title = match app.poller.consultation_id() {
        Some(id) => format!(" Summary for consultation #{} ", id),
        None => " Summary ".to_string(),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(title);

    let dots = ".".repeat(app.animation_frame as usize + 1);
    let text = vec![
        Line::from(""),
        Line::from(format!("{}{}", app.poller.dialog().message.trim_end_matches('.'), dots)),
        Line::from(""),
        Line::from(Span::styled(
            "Esc to close (generation continues on the server)",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let body = Paragraph::new(text).wrap(Wrap { trim: true }).block(block);
    frame.render_widget(body, popup_area);
}
