use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthError, Authenticator, FederatedCredential, LocalAuthenticator};
use crate::cli::Invocation;
use crate::config::Config;
use crate::render::Renderer;
use crate::session::SessionContext;
use crate::storage::KeyValueStore;
use crate::task::Priority;
use crate::view::FilterMode;
use crate::workspace::Workspace;
use crate::writer::WriteQueue;

const PASSWORD_ENV_VAR: &str = "CHECKLET_PASSWORD";

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "info",
        "toggle",
        "edit",
        "delete",
        "clear",
        "stats",
        "lists",
        "select",
        "newlist",
        "renamelist",
        "droplist",
        "register",
        "login",
        "logout",
        "signin",
        "whoami",
        "config",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &str, known: &[&'a str]) -> Option<&'a str> {
    if let Some(exact) = known.iter().copied().find(|name| *name == token) {
        return Some(exact);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Everything one command invocation works against.
pub struct App {
    pub cfg: Config,
    pub renderer: Renderer,
    pub session: SessionContext,
    pub auth: Box<dyn Authenticator>,
    pub workspace: Workspace,
    pub password: Option<String>,
}

impl App {
    #[instrument(skip_all)]
    pub fn open(
        cfg: Config,
        renderer: Renderer,
        kv: Arc<dyn KeyValueStore>,
        password: Option<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let writer = WriteQueue::spawn(kv.clone())?;
        let mut session = SessionContext::restore(kv.clone());
        let auth = LocalAuthenticator::new(kv.clone())?;
        let workspace = Workspace::attach(&mut session, kv, writer, now);

        Ok(Self {
            cfg,
            renderer,
            session,
            auth: Box::new(auth),
            workspace,
            password,
        })
    }

    fn password(&self) -> anyhow::Result<String> {
        if let Some(pw) = &self.password {
            return Ok(pw.clone());
        }
        std::env::var(PASSWORD_ENV_VAR)
            .map_err(|_| anyhow!("password required: pass --password or set {PASSWORD_ENV_VAR}"))
    }

    fn require_session(&self) -> anyhow::Result<()> {
        if self.workspace.is_ready() {
            Ok(())
        } else {
            Err(anyhow!("not signed in; run `checklet login EMAIL` first"))
        }
    }
}

#[instrument(skip(app, inv))]
pub fn dispatch(app: &mut App, inv: Invocation) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();
    let args = inv.command_args.as_slice();

    debug!(command, args = ?args, "dispatching command");

    let result = match command {
        "add" => cmd_add(app, args, now),
        "list" => cmd_list(app, args),
        "info" => cmd_info(app, args),
        "toggle" => cmd_toggle(app, args),
        "edit" => cmd_edit(app, args),
        "delete" => cmd_delete(app, args),
        "clear" => cmd_clear(app),
        "stats" => cmd_stats(app),
        "lists" => cmd_lists(app),
        "select" => cmd_select(app, args),
        "newlist" => cmd_newlist(app, args),
        "renamelist" => cmd_renamelist(app, args),
        "droplist" => cmd_droplist(app, args),
        "register" => cmd_register(app, args, now),
        "login" => cmd_login(app, args, now),
        "logout" => cmd_logout(app, now),
        "signin" => cmd_signin(app, args, now),
        "whoami" => cmd_whoami(app),
        "config" => cmd_config(app),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    };

    app.workspace.flush();
    result
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mod {
    Priority(Priority),
    List(String),
    Color(String),
}

/// Splits `priority:high list:work some text` into text and modifiers.
/// Everything after `--` is text.
fn parse_text_and_mods(args: &[String]) -> anyhow::Result<(String, Vec<Mod>)> {
    let mut text_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" && !literal {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg)? {
            mods.push(one_mod);
            continue;
        }

        text_parts.push(arg.as_str());
    }

    Ok((text_parts.join(" "), mods))
}

fn parse_one_mod(arg: &str) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = arg.split_once(':') else {
        return Ok(None);
    };
    let one_mod = match key {
        "priority" | "pri" => Mod::Priority(value.parse()?),
        "list" => {
            if value.is_empty() {
                return Err(anyhow!("list: needs a list id"));
            }
            Mod::List(value.to_string())
        }
        "color" => Mod::Color(value.to_string()),
        _ => return Ok(None),
    };
    Ok(Some(one_mod))
}

/// A task is referred to by id or by its 1-based row in the `all` view of
/// the selected list.
fn resolve_task_ref(ws: &Workspace, token: &str) -> anyhow::Result<String> {
    if let Some(task) = ws.tasks().get(token) {
        return Ok(task.id.clone());
    }
    if let Ok(n) = token.parse::<usize>() {
        let view = ws.view(FilterMode::All, "");
        if let Some(task) = n.checked_sub(1).and_then(|idx| view.get(idx)) {
            return Ok(task.id.clone());
        }
    }
    Err(anyhow!("no task matches {token}"))
}

fn single_arg<'a>(args: &'a [String], what: &str) -> anyhow::Result<&'a str> {
    match args {
        [one] => Ok(one.as_str()),
        [] => Err(anyhow!("missing {what}")),
        _ => Err(anyhow!("expected a single {what}")),
    }
}

#[instrument(skip(app, args, now))]
fn cmd_add(app: &mut App, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");
    app.require_session()?;

    let (text, mods) = parse_text_and_mods(args)?;
    let mut priority = app.cfg.get_parsed_or("default.priority", Priority::Medium);
    let mut list_id = None;
    for one_mod in mods {
        match one_mod {
            Mod::Priority(p) => priority = p,
            Mod::List(id) => list_id = Some(id),
            Mod::Color(_) => warn!("color: ignored for tasks"),
        }
    }

    if text.trim().is_empty() {
        debug!("nothing to add");
        return Ok(());
    }
    if let Some(id) = &list_id
        && !app.workspace.lists().contains(id)
    {
        return Err(anyhow!("unknown list: {id}"));
    }

    let Some(task) = app
        .workspace
        .add_task(&text, priority, list_id.as_deref(), now)
    else {
        return Err(anyhow!("task was not added"));
    };
    println!("Created task {} in {}.", task.id, task.list_id);
    Ok(())
}

#[instrument(skip(app, args))]
fn cmd_list(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;

    let mut mode = app.cfg.get_parsed_or("default.filter", FilterMode::All);
    let mut rest = args;
    if let Some((first, tail)) = args.split_first()
        && let Ok(parsed) = first.parse::<FilterMode>()
    {
        mode = parsed;
        rest = tail;
    }
    let query = rest.join(" ");

    let ws = &app.workspace;
    let selected = ws.lists().selected();
    let name = ws
        .lists()
        .get(selected)
        .map(|l| l.name.as_str())
        .unwrap_or(selected);
    println!("{name} ({mode})");

    let view = ws.view(mode, &query);
    app.renderer.print_task_table(&view)?;
    app.renderer.print_counts(ws.tasks().counts())?;
    Ok(())
}

#[instrument(skip(app, args))]
fn cmd_info(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;
    let id = resolve_task_ref(&app.workspace, single_arg(args, "task")?)?;
    let task = app
        .workspace
        .tasks()
        .get(&id)
        .ok_or_else(|| anyhow!("no task matches {id}"))?;
    app.renderer.print_task_info(task)
}

#[instrument(skip(app, args))]
fn cmd_toggle(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;
    let id = resolve_task_ref(&app.workspace, single_arg(args, "task")?)?;
    let store = app
        .workspace
        .tasks_mut()
        .ok_or_else(|| anyhow!("session not ready"))?;
    if !store.toggle(&id) {
        return Err(anyhow!("no task matches {id}"));
    }
    let done = store.get(&id).map(|t| t.done).unwrap_or(false);
    println!(
        "Task {id} {}.",
        if done { "completed" } else { "reopened" }
    );
    Ok(())
}

#[instrument(skip(app, args))]
fn cmd_edit(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;
    let Some((target, text)) = args.split_first() else {
        return Err(anyhow!("edit requires a task and new text"));
    };
    let id = resolve_task_ref(&app.workspace, target)?;
    let text = text.join(" ");
    let store = app
        .workspace
        .tasks_mut()
        .ok_or_else(|| anyhow!("session not ready"))?;
    if store.update(&id, &text) {
        println!("Modified task {id}.");
    } else {
        debug!("edit ignored");
    }
    Ok(())
}

#[instrument(skip(app, args))]
fn cmd_delete(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;
    let id = resolve_task_ref(&app.workspace, single_arg(args, "task")?)?;
    let store = app
        .workspace
        .tasks_mut()
        .ok_or_else(|| anyhow!("session not ready"))?;
    if store.delete(&id) {
        println!("Deleted task {id}.");
    }
    Ok(())
}

#[instrument(skip(app))]
fn cmd_clear(app: &mut App) -> anyhow::Result<()> {
    app.require_session()?;
    let store = app
        .workspace
        .tasks_mut()
        .ok_or_else(|| anyhow!("session not ready"))?;
    let removed = store.clear_completed();
    println!("Removed {removed} completed task(s).");
    Ok(())
}

fn cmd_stats(app: &mut App) -> anyhow::Result<()> {
    app.require_session()?;
    app.renderer.print_counts(app.workspace.tasks().counts())
}

fn cmd_lists(app: &mut App) -> anyhow::Result<()> {
    app.require_session()?;
    let lists = app.workspace.lists();
    app.renderer.print_lists(lists.lists(), lists.selected())
}

#[instrument(skip(app, args))]
fn cmd_select(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;
    let id = single_arg(args, "list id")?;
    let lists = app
        .workspace
        .lists_mut()
        .ok_or_else(|| anyhow!("session not ready"))?;
    if !lists.contains(id) {
        warn!(list = %id, "selecting a list that does not exist");
    }
    lists.select(id);
    println!("Selected list {id}.");
    Ok(())
}

#[instrument(skip(app, args))]
fn cmd_newlist(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;
    let (name, mods) = parse_text_and_mods(args)?;
    let color = mods.into_iter().find_map(|m| match m {
        Mod::Color(c) => Some(c),
        _ => None,
    });
    let lists = app
        .workspace
        .lists_mut()
        .ok_or_else(|| anyhow!("session not ready"))?;
    let list = lists
        .create(&name, color.as_deref())
        .ok_or_else(|| anyhow!("list name cannot be empty"))?;
    println!("Created list {} ({}).", list.name, list.id);
    Ok(())
}

#[instrument(skip(app, args))]
fn cmd_renamelist(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;
    let Some((id, name)) = args.split_first() else {
        return Err(anyhow!("renamelist requires a list id and a name"));
    };
    let lists = app
        .workspace
        .lists_mut()
        .ok_or_else(|| anyhow!("session not ready"))?;
    if !lists.rename(id, &name.join(" ")) {
        return Err(anyhow!("could not rename list {id}"));
    }
    println!("Renamed list {id}.");
    Ok(())
}

#[instrument(skip(app, args))]
fn cmd_droplist(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    app.require_session()?;
    let id = single_arg(args, "list id")?;
    let lists = app
        .workspace
        .lists_mut()
        .ok_or_else(|| anyhow!("session not ready"))?;
    if !lists.remove(id) {
        return Err(anyhow!("could not remove list {id} (unknown, or the last list)"));
    }
    println!("Removed list {id}; its tasks were kept.");
    Ok(())
}

fn auth_failure(err: AuthError) -> anyhow::Error {
    debug!(error = %err, "auth error detail");
    anyhow!(err.user_message())
}

#[instrument(skip(app, args, now))]
fn cmd_register(app: &mut App, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let email = single_arg(args, "email")?;
    let password = app.password()?;
    let user = app
        .session
        .register(app.auth.as_ref(), email, &password)
        .map_err(auth_failure)?;
    app.workspace.sync(now);
    println!("Welcome, {}!", user.display_name());
    Ok(())
}

#[instrument(skip(app, args, now))]
fn cmd_login(app: &mut App, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let email = single_arg(args, "email")?;
    let password = app.password()?;
    let user = app
        .session
        .login(app.auth.as_ref(), email, &password)
        .map_err(auth_failure)?;
    app.workspace.sync(now);
    println!("Welcome back, {}!", user.display_name());
    Ok(())
}

#[instrument(skip(app, now))]
fn cmd_logout(app: &mut App, now: DateTime<Utc>) -> anyhow::Result<()> {
    if app.session.user().is_none() {
        println!("Not signed in.");
        return Ok(());
    }
    app.session
        .logout(app.auth.as_ref())
        .map_err(auth_failure)?;
    app.workspace.sync(now);
    println!("Signed out.");
    Ok(())
}

#[instrument(skip(app, args, now))]
fn cmd_signin(app: &mut App, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let [provider, subject, email, name @ ..] = args else {
        return Err(anyhow!("signin requires PROVIDER SUBJECT EMAIL [NAME]"));
    };
    let name = name.join(" ");
    let credential = FederatedCredential {
        provider: provider.clone(),
        subject: subject.clone(),
        email: email.clone(),
        name: (!name.trim().is_empty()).then(|| name.trim().to_string()),
        photo_url: None,
    };
    let user = app
        .session
        .federated_sign_in(app.auth.as_ref(), &credential)
        .map_err(auth_failure)?;
    app.workspace.sync(now);
    println!("Welcome, {}!", user.display_name());
    Ok(())
}

fn cmd_whoami(app: &mut App) -> anyhow::Result<()> {
    match app.session.user() {
        Some(user) => {
            println!("{} <{}>", user.display_name(), user.email);
            println!("id {}", user.id);
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

fn cmd_config(app: &mut App) -> anyhow::Result<()> {
    let mut pairs: Vec<_> = app.cfg.iter().collect();
    pairs.sort();
    for (k, v) in pairs {
        println!("{k}={v}");
    }
    for file in &app.cfg.loaded_files {
        println!("# loaded {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "\
usage: checklet [--data DIR] [--password PW] [rc.KEY=VALUE] <command> [args]

tasks
  add [priority:low|medium|high] [list:ID] TEXT   add to the selected list
  list [{modes}] [QUERY]             show the selected list
  info REF | toggle REF | delete REF              REF = row number or task id
  edit REF TEXT                                   replace task text
  clear                                           drop completed tasks (all lists)
  stats                                           pending/done counts

lists
  lists | select ID | newlist NAME [color:#hex] | renamelist ID NAME | droplist ID

session
  register EMAIL | login EMAIL | logout | whoami
  signin PROVIDER SUBJECT EMAIL [NAME]

misc
  config | help | version",
        modes = FilterMode::names().join("|")
    );
    Ok(())
}
