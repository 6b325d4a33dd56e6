use std::io;

use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;

use crate::{
    backup::{format_size, BackupInfo},
    config::AppConfig,
    models::plan::{DifferenceKind, TableAnalysis},
    replication::executor::ExecutionResult,
};

use super::tui::{ConnectionForm, FormField, ReplicationUI, Term, MENU_ITEMS};

fn highlight() -> Style {
    Style::default()
        .bg(Color::Yellow)
        .fg(Color::Black)
        .add_modifier(Modifier::BOLD)
}

fn key(label: &str, color: Color) -> Span<'_> {
    Span::styled(
        label,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )
}

/// Body area above a short help line.
fn frame_layout(area: Rect) -> (Rect, Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(2)].as_ref())
        .split(area);
    (chunks[0], chunks[1])
}

fn render_help(f: &mut Frame, area: Rect, spans: Vec<Span>) {
    let help = Paragraph::new(Line::from(spans))
        .style(Style::default().fg(Color::White))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(help, area);
}

fn render_list(f: &mut Frame, area: Rect, title: &str, items: Vec<ListItem>, selected: Option<usize>) {
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .title_alignment(Alignment::Center);
    let list = List::new(items).block(block).highlight_style(highlight());
    let mut state = ListState::default();
    state.select(selected);
    f.render_stateful_widget(list, area, &mut state);
}

pub fn render_main_menu(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    let items: Vec<ListItem> = MENU_ITEMS.iter().map(|item| ListItem::new(*item)).collect();

    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(
                [
                    Constraint::Percentage(30),
                    Constraint::Percentage(40),
                    Constraint::Percentage(20),
                    Constraint::Percentage(10),
                ]
                .as_ref(),
            )
            .split(f.area());

        render_list(
            f,
            centered_rect(50, chunks[1]),
            "Development -> Production",
            items,
            Some(ui.selected_menu),
        );
        render_help(
            f,
            chunks[2],
            vec![
                key("Up", Color::Yellow),
                Span::raw("/"),
                key("Down", Color::Yellow),
                Span::raw(" to navigate, "),
                key("Enter", Color::Green),
                Span::raw(" to select, "),
                key("q", Color::Red),
                Span::raw(" to quit"),
            ],
        );
    })?;
    Ok(())
}

pub fn analysis_line(table: &TableAnalysis) -> String {
    let tag = if table.maintained {
        "[MAINTAIN] "
    } else {
        "[STRUCTURE]"
    };

    let status = if !table.exists_in_source {
        "missing in development".to_string()
    } else if !table.exists_in_target {
        "missing in production (will be created)".to_string()
    } else if !table.has_differences() {
        "up to date".to_string()
    } else {
        format!(
            "columns: {}, foreign keys: {}, indexes: {}",
            table.count_of(DifferenceKind::Column),
            table.count_of(DifferenceKind::ForeignKey),
            table.count_of(DifferenceKind::Index)
        )
    };

    let rows = if table.maintained {
        format!(" | rows {} -> {}", table.source_count, table.target_count)
    } else {
        String::new()
    };

    format!("{} {:<32} {}{}", tag, table.table, status, rows)
}

pub fn render_analysis(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    let (title, items): (String, Vec<ListItem>) = match &ui.analysis {
        Some(analysis) => (
            format!(
                "Analysis: {} tables, {} with differences",
                analysis.tables_analyzed(),
                analysis.tables_with_differences()
            ),
            analysis
                .tables
                .iter()
                .map(|t| {
                    let style = if t.has_differences() {
                        Style::default().fg(Color::Yellow)
                    } else {
                        Style::default().fg(Color::Green)
                    };
                    ListItem::new(analysis_line(t)).style(style)
                })
                .collect(),
        ),
        None => ("Analysis".to_string(), Vec::new()),
    };

    terminal.draw(|f| {
        let (body, help) = frame_layout(f.area());
        render_list(f, body, &title, items, None);
        render_help(f, help, vec![key("Esc", Color::Red), Span::raw(" to go back")]);
    })?;
    Ok(())
}

pub fn render_confirm(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    let text = vec![
        Line::from(format!(
            "This applies every structural difference to production ({})",
            ui.db_manager.target_database()
        )),
        Line::from(format!(
            "and replaces the data of {} maintained tables.",
            ui.config.maintained_tables().len()
        )),
        Line::from(""),
        Line::from(vec![
            key("y", Color::Green),
            Span::raw(" back up production first, "),
            key("n", Color::Yellow),
            Span::raw(" run without backup, "),
            key("Esc", Color::Red),
            Span::raw(" cancel"),
        ]),
    ];

    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(
                [
                    Constraint::Percentage(35),
                    Constraint::Percentage(30),
                    Constraint::Percentage(35),
                ]
                .as_ref(),
            )
            .split(f.area());

        let paragraph = Paragraph::new(text)
            .block(
                Block::default()
                    .title("Run full replication")
                    .borders(Borders::ALL)
                    .title_alignment(Alignment::Center),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, centered_rect(70, chunks[1]));
    })?;
    Ok(())
}

pub fn report_lines(result: &ExecutionResult) -> Vec<String> {
    let mut lines = Vec::new();

    match &result.failure {
        None => lines.push("Replication completed".to_string()),
        Some(failure) => lines.push(format!("Replication FAILED: {}", failure)),
    }

    if !result.created_tables.is_empty() {
        lines.push(format!("Created tables: {}", result.created_tables.join(", ")));
    }
    for (table, rows) in &result.copied_rows {
        lines.push(format!("Copied {} rows into {}", rows, table));
    }
    if !result.diagnostics.is_empty() {
        lines.push(String::new());
        lines.push("Warnings:".to_string());
        lines.extend(result.diagnostics.iter().map(|d| format!("  {}", d)));
    }

    lines
}

pub fn render_report(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    let (lines, color) = match &ui.report {
        Some(report) if report.is_success() => (report_lines(report), Color::Green),
        Some(report) => (report_lines(report), Color::Red),
        None => (Vec::new(), Color::White),
    };
    let text: Vec<Line> = lines.into_iter().map(Line::from).collect();

    terminal.draw(|f| {
        let (body, help) = frame_layout(f.area());
        let paragraph = Paragraph::new(text)
            .block(
                Block::default()
                    .title("Replication report")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(color)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(paragraph, body);
        render_help(f, help, vec![key("Esc", Color::Red), Span::raw(" to go back")]);
    })?;
    Ok(())
}

pub fn backup_line(backup: &BackupInfo) -> String {
    format!(
        "{:<45} {:<12} {:>3} tables {:>10}",
        backup.name,
        backup.metadata.environment,
        backup.metadata.tables.len(),
        format_size(backup.size)
    )
}

pub fn render_backups(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    let items: Vec<ListItem> = ui
        .backup_list
        .iter()
        .map(|b| ListItem::new(backup_line(b)))
        .collect();
    let selected = (!ui.backup_list.is_empty()).then_some(ui.selected_backup);
    let title = format!("Backups in {}", ui.backups.dir().display());

    terminal.draw(|f| {
        let (body, help) = frame_layout(f.area());
        render_list(f, body, &title, items, selected);
        render_help(
            f,
            help,
            vec![
                key("p", Color::Green),
                Span::raw(" backup production, "),
                key("d", Color::Green),
                Span::raw(" backup development, "),
                key("x", Color::Red),
                Span::raw(" delete, "),
                key("c", Color::Yellow),
                Span::raw(" keep newest 10, "),
                key("Esc", Color::Red),
                Span::raw(" back"),
            ],
        );
    })?;
    Ok(())
}

pub fn render_maintained_tables(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    let items: Vec<ListItem> = ui
        .tables
        .iter()
        .map(|table| {
            if ui.config.is_maintained(table) {
                ListItem::new(format!("[x] {}", table)).style(Style::default().fg(Color::Green))
            } else {
                ListItem::new(format!("[ ] {}", table))
            }
        })
        .collect();
    let selected = (!ui.tables.is_empty()).then_some(ui.selected_table);

    terminal.draw(|f| {
        let (body, help) = frame_layout(f.area());
        render_list(f, body, "Tables with maintained data", items, selected);
        render_help(
            f,
            help,
            vec![
                key("Space", Color::Green),
                Span::raw(" to toggle, "),
                key("a", Color::Green),
                Span::raw(" all, "),
                key("c", Color::Yellow),
                Span::raw(" none, "),
                key("Esc", Color::Red),
                Span::raw(" to go back"),
            ],
        );
    })?;
    Ok(())
}

pub fn environment_line(name: &str, config: &AppConfig) -> String {
    match config.environment(name) {
        Ok(connection) => format!("{:<12} {}", name, connection.redacted_url()),
        Err(e) => format!("{:<12} {}", name, e),
    }
}

pub fn render_configuration(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    let items: Vec<ListItem> = ui
        .environments
        .iter()
        .map(|name| ListItem::new(environment_line(name, &ui.config)))
        .collect();
    let selected = (!ui.environments.is_empty()).then_some(ui.selected_environment);
    let title = format!("Configuration ({})", ui.config.path().display());

    terminal.draw(|f| {
        let (body, help) = frame_layout(f.area());
        render_list(f, body, &title, items, selected);
        render_help(
            f,
            help,
            vec![
                key("Enter", Color::Green),
                Span::raw(" to edit, "),
                key("Esc", Color::Red),
                Span::raw(" to go back"),
            ],
        );
    })?;
    Ok(())
}

pub fn form_lines(form: &ConnectionForm) -> Vec<String> {
    FormField::ALL
        .iter()
        .map(|field| {
            let value = form.value(*field);
            let shown = if *field == FormField::Password {
                "*".repeat(value.len())
            } else {
                value.to_string()
            };
            let mut line = format!("{}: {}", field.label(), shown);
            if *field == form.current_field {
                line.push_str(" <");
            }
            line
        })
        .collect()
}

pub fn render_edit_connection(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    let Some(form) = &ui.connection_form else {
        return Ok(());
    };
    let current = environment_line(&form.environment, &ui.config);
    let mut text: Vec<Line> = vec![Line::from(current), Line::from("")];
    text.extend(form_lines(form).into_iter().map(Line::from));
    let title = format!("Edit {} (blank keeps the current value)", form.environment);

    terminal.draw(|f| {
        let (body, help) = frame_layout(f.area());
        let paragraph = Paragraph::new(text)
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .title_alignment(Alignment::Center),
            )
            .style(Style::default().fg(Color::White))
            .alignment(Alignment::Left);
        f.render_widget(paragraph, centered_rect(60, body));
        render_help(
            f,
            help,
            vec![
                key("Enter", Color::Green),
                Span::raw(" next field / save, "),
                key("Esc", Color::Red),
                Span::raw(" to discard"),
            ],
        );
    })?;
    Ok(())
}

pub fn render_message(ui: &ReplicationUI, terminal: &mut Term) -> io::Result<()> {
    render_popup(terminal, "Message", &ui.message, "Press any key to continue")
}

pub fn render_busy(terminal: &mut Term, message: &str) -> io::Result<()> {
    render_popup(terminal, "Working", message, "Please wait")
}

fn render_popup(terminal: &mut Term, title: &str, message: &str, footer: &str) -> io::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(
                [
                    Constraint::Percentage(40),
                    Constraint::Percentage(20),
                    Constraint::Percentage(40),
                ]
                .as_ref(),
            )
            .split(f.area());

        let text = vec![
            Line::from(message.to_string()),
            Line::from(""),
            Line::from(Span::styled(
                footer.to_string(),
                Style::default().fg(Color::DarkGray),
            )),
        ];
        let popup = Paragraph::new(text)
            .block(
                Block::default()
                    .title(title.to_string())
                    .borders(Borders::ALL)
                    .title_alignment(Alignment::Center),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(popup, centered_rect(60, chunks[1]));
    })?;
    Ok(())
}

fn centered_rect(percent_x: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(r);

    popup_layout[1]
}
