use crate::app::{App, CurrentScreen, Row as TreeRow};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Row, Table, Wrap},
};
use ua_tree::presentation::{COLUMN_HEADERS, Glyph, columns, path_text};

pub fn render(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(0),
                Constraint::Length(6),
                Constraint::Length(3),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(f.area());

    let main_area = chunks[0];
    let details_area = chunks[1];
    let status_area = chunks[2];
    let help_area = chunks[3];

    match app.current_screen {
        CurrentScreen::Browse => render_tree(f, app, main_area),
        CurrentScreen::Loading => {
            render_tree(f, app, main_area);
            render_loading_popup(f, app, main_area);
        }
        CurrentScreen::Exiting => {}
    }

    render_details(f, app, details_area);
    render_status_bar(f, app, status_area);
    render_help(f, app, help_area);
}

fn render_help(f: &mut Frame, app: &App, area: Rect) {
    let msg = match app.current_screen {
        CurrentScreen::Browse => {
            "↑/↓: Nav | PgDn/PgUp: Page | →/Enter: Expand | ←: Collapse | r: Refresh | R: Reload | c: Copy path | i: Copy id | q: Quit"
        }
        CurrentScreen::Loading => "Please wait...",
        CurrentScreen::Exiting => "Exiting...",
    };

    let span = Span::styled(msg, Style::default().fg(Color::DarkGray));
    f.render_widget(Paragraph::new(span), area);
}

/// Expand/collapse marker for a row.
fn expander(app: &App, row: TreeRow) -> &'static str {
    if app.cache.is_loading(row.id) {
        "… "
    } else if !app.cache.is_fetched(row.id) {
        "▸ "
    } else if app.cache.cached_children(row.id).is_empty() {
        "  "
    } else if app.expanded.contains(&row.id) {
        "▾ "
    } else {
        "▸ "
    }
}

fn render_tree(f: &mut Frame, app: &mut App, area: Rect) {
    let header = Row::new(COLUMN_HEADERS.to_vec()).style(
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    );

    let rows: Vec<Row> = app
        .rows
        .iter()
        .filter_map(|&row| {
            let entry = app.cache.get(row.id)?;
            let glyph = Glyph::of(entry.description());
            let [display_name, browse_name, node_id] = columns(entry.description());
            let first = Line::from(vec![
                Span::raw("  ".repeat(row.depth)),
                Span::raw(expander(app, row)),
                Span::styled(
                    format!("{} ", glyph.symbol()),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw(display_name),
            ]);
            Some(Row::new(vec![
                first,
                Line::from(browse_name),
                Line::from(Span::styled(node_id, Style::default().fg(Color::DarkGray))),
            ]))
        })
        .collect();

    let widths = [
        Constraint::Percentage(50),
        Constraint::Percentage(25),
        Constraint::Percentage(25),
    ];

    let title = format!(" {} ({} cached) ", app.root_node_id, app.cache.len());
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(Style::default().bg(Color::Blue).fg(Color::White))
        .highlight_symbol(">> ");

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_details(f: &mut Frame, app: &App, area: Rect) {
    let lines: Vec<Line> = app
        .selected_entry()
        .and_then(|id| app.cache.get(id).map(|entry| (id, entry)))
        .map(|(id, entry)| {
            let glyph = Glyph::of(entry.description());
            let path = app.cache.path_to(id).map(|p| path_text(&p)).unwrap_or_default();
            let children = if entry.is_loading() {
                "loading".to_string()
            } else if entry.is_fetched() {
                entry.children().len().to_string()
            } else {
                "not fetched".to_string()
            };
            vec![
                Line::from(vec![
                    Span::styled("Class: ", Style::default().fg(Color::DarkGray)),
                    Span::raw(format!("{} ({})", entry.node_class(), glyph.label())),
                ]),
                Line::from(vec![
                    Span::styled("TypeDefinition: ", Style::default().fg(Color::DarkGray)),
                    Span::raw(entry.type_definition().to_string()),
                ]),
                Line::from(vec![
                    Span::styled("Path: ", Style::default().fg(Color::DarkGray)),
                    Span::raw(path),
                ]),
                Line::from(vec![
                    Span::styled("Children: ", Style::default().fg(Color::DarkGray)),
                    Span::raw(children),
                ]),
            ]
        })
        .unwrap_or_default();

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Details "))
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let display_messages: Vec<Line> = app
        .messages
        .last()
        .map(|m| {
            vec![Line::from(vec![
                Span::styled("- ", Style::default().fg(Color::DarkGray)),
                Span::raw(m),
            ])]
        })
        .unwrap_or_default();

    let paragraph = Paragraph::new(display_messages)
        .block(Block::default().borders(Borders::ALL).title(" Status Log "))
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn render_loading_popup(f: &mut Frame, app: &App, area: Rect) {
    let msg = format!("Resolving {}...", app.root_node_id);

    let block = Block::default()
        .title(" Loading ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let area = centered_rect(60, 20, area);
    f.render_widget(Clear, area);
    f.render_widget(Paragraph::new(msg).block(block), area);
}

/// helper function to create a centered rect using up certain percentage of the available rect `r`
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
