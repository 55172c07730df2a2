use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_created;
use crate::state::ListState;
use crate::task::{Filter, TaskForm};

pub const EMPTY_CATEGORY: &str = "No tasks available in this category.";
pub const SEE_MORE: &str = "See More";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.color()? && io::stdout().is_terminal();
        Ok(Self { color })
    }

    /// Renderer without escape codes.
    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Tabs, the task table, the "See More" footer and the error modal on top.
    #[tracing::instrument(skip_all)]
    pub fn render_list<W: Write>(&self, out: &mut W, state: &ListState) -> anyhow::Result<()> {
        self.write_tabs(out, state)?;

        if state.is_busy() {
            let text = if state.is_mutating() {
                "Saving..."
            } else if state.page_index() > 0 {
                "Loading More..."
            } else {
                "Loading..."
            };
            writeln!(out, "{}", self.paint(text, "36"))?;
        }

        if state.items().is_empty() {
            if !state.is_loading() {
                writeln!(out, "{EMPTY_CATEGORY}")?;
            }
        } else {
            self.write_task_table(out, state)?;
            if state.has_more() {
                writeln!(
                    out,
                    "{} ({} of {} shown, type `more`)",
                    self.paint(SEE_MORE, "34"),
                    state.items().len(),
                    state.total_count()
                )?;
            }
        }

        if let Some(slot) = state.error() {
            writeln!(out)?;
            write_modal(out, &self.paint("Error!", "31"), &slot.message)?;
        }

        Ok(())
    }

    pub fn render_form<W: Write>(&self, out: &mut W, form: &TaskForm) -> anyhow::Result<()> {
        writeln!(out, "Add a New Task")?;
        writeln!(out, "  title:       {}", placeholder(form.title(), "(e.g. Plan weekend trip)"))?;
        writeln!(
            out,
            "  description: {}",
            placeholder(form.description(), "(briefly describe the task details)")
        )?;
        Ok(())
    }

    fn write_tabs<W: Write>(&self, out: &mut W, state: &ListState) -> anyhow::Result<()> {
        let tabs = Filter::ALL
            .iter()
            .map(|filter| {
                if *filter == state.active_filter() {
                    self.paint(&format!("[{}]", filter.label()), "1;34")
                } else {
                    format!(" {} ", filter.label())
                }
            })
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(out, "Your Tasks   {tabs}")?;
        Ok(())
    }

    fn write_task_table<W: Write>(&self, out: &mut W, state: &ListState) -> anyhow::Result<()> {
        let actionable = state.active_filter() == Filter::Pending;
        let mut headers = vec![
            "ID".to_string(),
            "Title".to_string(),
            "Description".to_string(),
            "Created".to_string(),
        ];
        if actionable {
            headers.push("Action".to_string());
        }

        let rows = state
            .items()
            .iter()
            .map(|task| {
                let id = self.paint(&task.id.to_string(), "33");
                let (title, description) = if task.completed {
                    (self.paint(&task.title, "9"), self.paint(&task.description, "9"))
                } else {
                    (task.title.clone(), task.description.clone())
                };
                let mut row = vec![id, title, description, format_created(task.created_at)];
                if actionable {
                    row.push(format!("done {}", task.id));
                }
                row
            })
            .collect();

        write_table(out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn placeholder(value: &str, hint: &str) -> String {
    if value.is_empty() {
        hint.to_string()
    } else {
        value.to_string()
    }
}

fn write_modal<W: Write>(mut writer: W, heading: &str, message: &str) -> anyhow::Result<()> {
    let footer = "type `dismiss` to close";
    let inner = [heading, message, footer]
        .iter()
        .map(|line| UnicodeWidthStr::width(strip_ansi(line).as_str()))
        .max()
        .unwrap_or(0);

    writeln!(writer, "+{}+", "-".repeat(inner + 2))?;
    for line in [heading, message, footer] {
        let padding = inner.saturating_sub(UnicodeWidthStr::width(strip_ansi(line).as_str()));
        writeln!(writer, "| {}{} |", line, " ".repeat(padding))?;
    }
    writeln!(writer, "+{}+", "-".repeat(inner + 2))?;
    Ok(())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::backend::TaskPage;
    use crate::error::SyncError;
    use crate::task::{Task, TaskId};

    fn task(id: u64, completed: bool) -> Task {
        Task {
            id: TaskId(id),
            title: format!("Task {id}"),
            description: "Book the cabin".to_string(),
            completed,
            created_at: Utc
                .with_ymd_and_hms(2024, 5, 1, 9, 30, 0)
                .single()
                .expect("valid"),
        }
    }

    fn render(state: &ListState) -> String {
        let mut out = Vec::new();
        Renderer::plain().render_list(&mut out, state).expect("render");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn shows_see_more_while_items_remain() {
        let mut state = ListState::default();
        let ticket = state.mount();
        state.apply_fetch(
            ticket,
            Ok(TaskPage {
                items: (1..=5).map(|id| task(id, false)).collect(),
                total_count: 12,
            }),
        );

        let text = render(&state);
        assert!(text.contains("[New]"));
        assert!(text.contains("Task 5"));
        assert!(text.contains("done 5"));
        assert!(text.contains("See More (5 of 12 shown"));
        assert!(!text.contains("Error!"));
    }

    #[test]
    fn empty_category_and_no_action_column_on_completed_tab() {
        let mut state = ListState::default();
        let ticket = state.switch_filter(Filter::Completed).expect("switch");
        assert!(render(&state).contains("Loading..."));

        state.apply_fetch(
            ticket,
            Ok(TaskPage {
                items: vec![],
                total_count: 0,
            }),
        );
        let text = render(&state);
        assert!(text.contains("[Completed]"));
        assert!(text.contains(EMPTY_CATEGORY));
        assert!(!text.contains(SEE_MORE));
    }

    #[test]
    fn modal_frames_the_error_message() {
        let mut state = ListState::default();
        let ticket = state.mount();
        state.apply_fetch(
            ticket,
            Err(SyncError::Network {
                status: Some(500),
                message: "server error".into(),
            }),
        );

        let text = render(&state);
        assert!(text.contains("| Error!"));
        assert!(text.contains("| server error"));
        assert!(text.contains("dismiss"));
    }

    #[test]
    fn strip_ansi_removes_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[33m7\x1b[0m"), "7");
    }
}
