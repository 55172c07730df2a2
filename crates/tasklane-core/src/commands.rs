use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument};

use crate::backend::TaskBackend;
use crate::cli::Invocation;
use crate::config::Config;
use crate::render::Renderer;
use crate::session::{Session, SessionOptions};
use crate::task::{Filter, TaskId};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "shell", "list", "add", "done", "delete", "show", "help", "version",
    ]
}

pub fn shell_command_names() -> Vec<&'static str> {
    vec![
        "new",
        "completed",
        "more",
        "title",
        "desc",
        "add",
        "done",
        "delete",
        "dismiss",
        "refresh",
        "help",
        "quit",
    ]
}

/// Exact names win; otherwise a unique prefix expands to its command.
pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

pub fn session_options(cfg: &Config, filter: Filter) -> anyhow::Result<SessionOptions> {
    Ok(SessionOptions {
        page_size: cfg.page_size()?,
        request_timeout: cfg.request_timeout()?,
        filter,
    })
}

#[instrument(skip(cfg, renderer, backend, inv), fields(command = %inv.command))]
pub async fn dispatch(
    cfg: &Config,
    renderer: &Renderer,
    backend: Arc<dyn TaskBackend>,
    inv: Invocation,
) -> anyhow::Result<()> {
    debug!(args = ?inv.command_args, "dispatching command");

    match inv.command.as_str() {
        "shell" => {
            let mut session = Session::new(backend, session_options(cfg, Filter::Pending)?);
            run_shell(&mut session, renderer).await
        }
        "list" => cmd_list(cfg, renderer, backend, &inv.command_args).await,
        "add" => cmd_add(cfg, renderer, backend, &inv.command_args).await,
        "done" => cmd_done(cfg, renderer, backend, &inv.command_args).await,
        "delete" => cmd_delete(cfg, renderer, backend, &inv.command_args).await,
        "show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

async fn cmd_list(
    cfg: &Config,
    renderer: &Renderer,
    backend: Arc<dyn TaskBackend>,
    args: &[String],
) -> anyhow::Result<()> {
    let mut filter = Filter::Pending;
    let mut all_pages = false;
    for arg in args {
        if arg == "--all" {
            all_pages = true;
        } else {
            filter = arg.parse()?;
        }
    }
    info!(%filter, all_pages, "command list");

    let mut session = Session::new(backend, session_options(cfg, filter)?);
    session.mount();
    session.settle().await;
    while all_pages && session.state().error().is_none() && session.advance_page() {
        session.settle().await;
    }
    finish_one_shot(&session, renderer)
}

async fn cmd_add(
    cfg: &Config,
    renderer: &Renderer,
    backend: Arc<dyn TaskBackend>,
    args: &[String],
) -> anyhow::Result<()> {
    let (title, description) = match args.split_first() {
        Some((title, rest)) => (title.clone(), rest.join(" ")),
        None => (String::new(), String::new()),
    };
    info!(title_len = title.len(), description_len = description.len(), "command add");

    let mut session = Session::new(backend, session_options(cfg, Filter::Pending)?);
    session.set_title(title);
    session.set_description(description);
    if session.submit_form() {
        session.settle().await;
    }
    finish_one_shot(&session, renderer)
}

async fn cmd_done(
    cfg: &Config,
    renderer: &Renderer,
    backend: Arc<dyn TaskBackend>,
    args: &[String],
) -> anyhow::Result<()> {
    let id = single_id(args, "done")?;
    info!(%id, "command done");

    let mut session = Session::new(backend, session_options(cfg, Filter::Pending)?);
    if session.mark_done(id) {
        session.settle().await;
    }
    finish_one_shot(&session, renderer)
}

async fn cmd_delete(
    cfg: &Config,
    renderer: &Renderer,
    backend: Arc<dyn TaskBackend>,
    args: &[String],
) -> anyhow::Result<()> {
    let id = single_id(args, "delete")?;
    info!(%id, "command delete");

    let mut session = Session::new(backend, session_options(cfg, Filter::Pending)?);
    if session.delete(id) {
        session.settle().await;
    }
    finish_one_shot(&session, renderer)
}

fn single_id(args: &[String], command: &str) -> anyhow::Result<TaskId> {
    match args {
        [id] => id.parse(),
        _ => Err(anyhow!("{command} requires exactly one task id")),
    }
}

/// Prints the list; a filled error slot becomes the command's error.
fn finish_one_shot(session: &Session, renderer: &Renderer) -> anyhow::Result<()> {
    let state = session.state();
    if let Some(slot) = state.error() {
        return Err(anyhow!("{} ({} error)", slot.message, slot.kind));
    }
    let mut out = io::stdout().lock();
    renderer.render_list(&mut out, state)?;
    out.flush()?;
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    for file in &cfg.loaded_files {
        println!("# loaded {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("Commands: shell (default), list [new|completed] [--all], add <title> <description...>, done <id>, delete <id>, show, version");
    println!();
    println!("{SHELL_HELP}");
    Ok(())
}

const SHELL_HELP: &str = "Shell: new | completed (switch tab), more (See More), title <text>, desc <text>, add (submit form), done <id>, delete <id>, dismiss (close error), refresh, help, quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Tab(Filter),
    More,
    Title(String),
    Desc(String),
    Add,
    Done(TaskId),
    Delete(TaskId),
    Dismiss,
    Refresh,
    Help,
    Quit,
}

impl ShellCommand {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let known = shell_command_names();
        let name = expand_command_abbrev(head, &known)
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {head} (try `help`)"))?;

        let cmd = match name {
            "new" => ShellCommand::Tab(Filter::Pending),
            "completed" => ShellCommand::Tab(Filter::Completed),
            "more" => ShellCommand::More,
            "title" => ShellCommand::Title(rest.to_string()),
            "desc" => ShellCommand::Desc(rest.to_string()),
            "add" => ShellCommand::Add,
            "done" => ShellCommand::Done(rest.parse()?),
            "delete" => ShellCommand::Delete(rest.parse()?),
            "dismiss" => ShellCommand::Dismiss,
            "refresh" => ShellCommand::Refresh,
            "help" => ShellCommand::Help,
            "quit" => ShellCommand::Quit,
            other => return Err(anyhow!("unhandled shell command: {other}")),
        };
        Ok(Some(cmd))
    }

    /// Commands accepted while the error modal is open.
    pub fn allowed_while_modal(&self) -> bool {
        matches!(
            self,
            ShellCommand::Dismiss | ShellCommand::Help | ShellCommand::Quit
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellFlow {
    Continue(Option<String>),
    Quit,
}

/// Applies one shell command to the session. The returned note is shown below
/// the redrawn list.
pub fn apply_shell_command(session: &mut Session, cmd: ShellCommand) -> ShellFlow {
    let state = session.state();
    if state.error().is_some() && !cmd.allowed_while_modal() {
        return note("Close the error first (`dismiss`).");
    }

    match cmd {
        ShellCommand::Tab(filter) => {
            session.switch_filter(filter);
            ShellFlow::Continue(None)
        }
        ShellCommand::More => {
            if session.advance_page() {
                ShellFlow::Continue(None)
            } else if !session.state().has_more() {
                note("Everything in this category is loaded.")
            } else {
                note("Still working, try again when the current request finishes.")
            }
        }
        ShellCommand::Title(title) => {
            session.set_title(title);
            ShellFlow::Continue(None)
        }
        ShellCommand::Desc(description) => {
            session.set_description(description);
            ShellFlow::Continue(None)
        }
        ShellCommand::Add => {
            if session.state().is_busy() {
                return note("Still working, try again when the current request finishes.");
            }
            session.submit_form();
            ShellFlow::Continue(None)
        }
        ShellCommand::Done(id) => {
            if session.state().active_filter() != Filter::Pending {
                return note("Switch to the New tab (`new`) to mark tasks done.");
            }
            if !listed(session, id) {
                return note(&format!("Task {id} is not in the list."));
            }
            if session.mark_done(id) {
                ShellFlow::Continue(None)
            } else {
                note("Still working, try again when the current request finishes.")
            }
        }
        ShellCommand::Delete(id) => {
            if !listed(session, id) {
                return note(&format!("Task {id} is not in the list."));
            }
            if session.delete(id) {
                ShellFlow::Continue(None)
            } else {
                note("Still working, try again when the current request finishes.")
            }
        }
        ShellCommand::Dismiss => {
            session.dismiss_error();
            ShellFlow::Continue(None)
        }
        ShellCommand::Refresh => {
            session.refresh();
            ShellFlow::Continue(None)
        }
        ShellCommand::Help => note(SHELL_HELP),
        ShellCommand::Quit => ShellFlow::Quit,
    }
}

fn note(text: &str) -> ShellFlow {
    ShellFlow::Continue(Some(text.to_string()))
}

fn listed(session: &Session, id: TaskId) -> bool {
    session.state().items().iter().any(|task| task.id == id)
}

/// Interactive loop: reads commands from stdin and applies request completions
/// as they arrive, redrawing after each.
#[instrument(skip_all)]
pub async fn run_shell(session: &mut Session, renderer: &Renderer) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    session.mount();
    redraw(session, renderer, None)?;

    loop {
        tokio::select! {
            event = session.next_completion(), if session.in_flight() > 0 => {
                debug!(?event, "applied completion");
                redraw(session, renderer, None)?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read from stdin")? else {
                    info!("stdin closed, leaving shell");
                    break;
                };
                let flow = match ShellCommand::parse(&line) {
                    Ok(Some(cmd)) => apply_shell_command(session, cmd),
                    Ok(None) => ShellFlow::Continue(None),
                    Err(err) => ShellFlow::Continue(Some(err.to_string())),
                };
                match flow {
                    ShellFlow::Quit => break,
                    ShellFlow::Continue(message) => redraw(session, renderer, message.as_deref())?,
                }
            }
        }
    }

    Ok(())
}

fn redraw(session: &Session, renderer: &Renderer, message: Option<&str>) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out)?;
    renderer.render_form(&mut out, session.form())?;
    writeln!(out)?;
    renderer.render_list(&mut out, session.state())?;
    if let Some(message) = message {
        writeln!(out, "{message}")?;
    }
    write!(out, "> ")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviations_must_be_unique() {
        let known = shell_command_names();
        assert_eq!(expand_command_abbrev("mo", &known), Some("more"));
        assert_eq!(expand_command_abbrev("done", &known), Some("done"));
        assert_eq!(expand_command_abbrev("d", &known), None);
        assert_eq!(expand_command_abbrev("zzz", &known), None);
    }

    #[test]
    fn shell_commands_parse_with_arguments() {
        assert_eq!(ShellCommand::parse("   ").expect("blank"), None);
        assert_eq!(
            ShellCommand::parse("title Plan weekend trip").expect("title"),
            Some(ShellCommand::Title("Plan weekend trip".to_string()))
        );
        assert_eq!(
            ShellCommand::parse("done 7").expect("done"),
            Some(ShellCommand::Done(TaskId(7)))
        );
        assert_eq!(
            ShellCommand::parse("comp").expect("tab"),
            Some(ShellCommand::Tab(Filter::Completed))
        );
        assert!(ShellCommand::parse("done seven").is_err());
        assert!(ShellCommand::parse("de 1").is_err());
    }

    #[test]
    fn only_dismiss_help_and_quit_pass_the_modal() {
        assert!(ShellCommand::Dismiss.allowed_while_modal());
        assert!(ShellCommand::Quit.allowed_while_modal());
        assert!(!ShellCommand::More.allowed_while_modal());
        assert!(!ShellCommand::Tab(Filter::Completed).allowed_while_modal());
    }

    #[test]
    fn single_id_requires_exactly_one_argument() {
        assert_eq!(single_id(&["3".to_string()], "done").expect("id"), TaskId(3));
        assert!(single_id(&[], "done").is_err());
        assert!(single_id(&["1".to_string(), "2".to_string()], "done").is_err());
    }
}
