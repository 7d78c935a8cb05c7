//! Line-oriented checklist editor driving a [`Reconciler`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use crate::backup;
use crate::checklist::{self, APPROVAL_OPTIONS};
use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::record::{ClientId, FieldKey, FieldKind};

const EVIDENCE_PREVIEW_CHARS: usize = 72;

pub const HELP: &str = "\
commands:
  set <item> aprobado <Aprobado|No aprobado|No aplica|->   commit a verdict
  set <item> evidencias <text>                            commit evidence
  draft <item> <aprobado|evidencias> <value>              type without committing
  page <n> | next | prev                                  change page (commits drafts)
  save                                                    save to the remote store now
  status | validate | show
  export [path] | import <path>
  client <10-digit number>                                switch client
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: FieldKey, value: String },
    Draft { key: FieldKey, value: String },
    Page(usize),
    Next,
    Prev,
    Save,
    Status,
    Validate,
    Show,
    Export(Option<PathBuf>),
    Import(PathBuf),
    Client(ClientId),
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn normalize_value(kind: FieldKind, raw: &str) -> Result<String> {
    let raw = raw.trim();
    match kind {
        FieldKind::Evidencias => Ok(raw.to_string()),
        FieldKind::Aprobado => {
            if raw.is_empty() || raw == "-" {
                return Ok(String::new());
            }
            APPROVAL_OPTIONS
                .iter()
                .find(|o| o.eq_ignore_ascii_case(raw))
                .map(|o| o.to_string())
                .ok_or_else(|| {
                    Error::msg(format!(
                        "unknown verdict '{raw}' (expected one of: {})",
                        APPROVAL_OPTIONS.join(", ")
                    ))
                })
        }
    }
}

fn parse_field(args: &str) -> Result<(FieldKey, String)> {
    let mut parts = args.trim().splitn(3, char::is_whitespace);
    let item = parts.next().unwrap_or_default();
    let kind = parts.next().unwrap_or_default();
    let value = parts.next().unwrap_or_default();
    let item_id = item
        .parse::<u32>()
        .ok()
        .filter(|id| checklist::item(*id).is_some())
        .ok_or_else(|| Error::msg(format!("unknown checklist item '{item}'")))?;
    let kind = kind.parse::<FieldKind>()?;
    Ok((FieldKey::new(kind, item_id), normalize_value(kind, value)?))
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = line
        .split_once(char::is_whitespace)
        .map(|(h, r)| (h, r.trim()))
        .unwrap_or((line, ""));
    let cmd = match head.to_ascii_lowercase().as_str() {
        "set" => {
            let (key, value) = parse_field(rest)?;
            Command::Set { key, value }
        }
        "draft" => {
            let (key, value) = parse_field(rest)?;
            Command::Draft { key, value }
        }
        "page" => Command::Page(
            rest.parse()
                .map_err(|_| Error::msg(format!("invalid page number '{rest}'")))?,
        ),
        "next" => Command::Next,
        "prev" => Command::Prev,
        "save" => Command::Save,
        "status" => Command::Status,
        "validate" => Command::Validate,
        "show" => Command::Show,
        "export" => Command::Export((!rest.is_empty()).then(|| PathBuf::from(rest))),
        "import" if !rest.is_empty() => Command::Import(PathBuf::from(rest)),
        "import" => return Err(Error::msg("import needs a file path")),
        "client" => Command::Client(ClientId::parse(rest)?),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(Error::msg(format!("unknown command '{other}' (try 'help')"))),
    };
    Ok(Some(cmd))
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EVIDENCE_PREVIEW_CHARS {
        return flat;
    }
    let cut = flat.chars().take(EVIDENCE_PREVIEW_CHARS).collect::<String>();
    format!("{cut}...")
}

pub struct Editor {
    rec: Reconciler,
    // Values typed on the current page but not committed yet.
    drafts: BTreeMap<FieldKey, String>,
}

impl Editor {
    pub fn new(rec: Reconciler) -> Self {
        Self {
            rec,
            drafts: BTreeMap::new(),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.rec
    }

    pub fn drafts(&self) -> &BTreeMap<FieldKey, String> {
        &self.drafts
    }

    fn visible_values(&self) -> Vec<(FieldKey, String)> {
        let Some(session) = self.rec.session() else {
            return Vec::new();
        };
        self.rec
            .visible_items()
            .iter()
            .flat_map(|item| FieldKind::ALL.map(|kind| FieldKey::new(kind, item.id)))
            .map(|key| {
                let value = self
                    .drafts
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| session.field(&key.to_string()).to_string());
                (key, value)
            })
            .collect()
    }

    fn go_to(&mut self, page: usize) -> Result<()> {
        let visible = self.visible_values();
        self.rec.on_page_change(&visible, page)?;
        self.drafts.clear();
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let Some(session) = self.rec.session() else {
            return "no client selected\n".into();
        };
        let _ = writeln!(
            out,
            "== client {} | page {}/{} | {}",
            session.client_id(),
            self.rec.page(),
            self.rec.total_pages(),
            session.state()
        );
        let done = self.rec.progress();
        for item in self.rec.visible_items() {
            let complete = done.iter().any(|(i, c)| i.id == item.id && *c);
            let _ = writeln!(
                out,
                "{:>2}. [{}] {}",
                item.id,
                if complete { "x" } else { " " },
                item.label
            );
            let _ = writeln!(out, "    expected: {}", item.expectation);
            for kind in FieldKind::ALL {
                let key = FieldKey::new(kind, item.id);
                let (value, marker) = match self.drafts.get(&key) {
                    Some(d) => (d.as_str(), " (draft)"),
                    None => (session.field(&key.to_string()), ""),
                };
                let shown = if value.is_empty() {
                    "-".to_string()
                } else {
                    preview(value)
                };
                let _ = writeln!(out, "    {:<10}: {shown}{marker}", kind.as_str());
            }
        }
        out
    }

    fn status_text(&self) -> String {
        let Some(session) = self.rec.session() else {
            return "no client selected".into();
        };
        let mut out = format!(
            "client {}: {} | revision {} | {} answers",
            session.client_id(),
            session.state(),
            session.revision().unwrap_or("none"),
            session.fields().len()
        );
        if let Some(deadline) = self.rec.next_deadline() {
            let ms = deadline.saturating_duration_since(Instant::now()).as_millis();
            let _ = write!(out, " | remote sync in {ms}ms");
        }
        if let Some(e) = session.last_error() {
            let _ = write!(out, " | last error: {e}");
        }
        out
    }

    pub fn handle(&mut self, cmd: Command) -> Result<Flow> {
        match cmd {
            Command::Set { key, value } => {
                self.drafts.remove(&key);
                self.rec.on_field_edit(key, value)?;
            }
            Command::Draft { key, value } => {
                self.drafts.insert(key, value);
            }
            Command::Page(n) => {
                self.go_to(n)?;
                print!("{}", self.render());
            }
            Command::Next => {
                let page = self.rec.page() + 1;
                self.go_to(page)?;
                print!("{}", self.render());
            }
            Command::Prev => {
                let page = self.rec.page().saturating_sub(1);
                self.go_to(page)?;
                print!("{}", self.render());
            }
            Command::Save => {
                self.flush_drafts()?;
                // Failures are already reported through the status sink.
                let _ = self.rec.on_explicit_save();
            }
            Command::Status => println!("{}", self.status_text()),
            Command::Validate => {
                self.flush_drafts()?;
                self.rec.validate();
            }
            Command::Show => print!("{}", self.render()),
            Command::Export(path) => {
                self.flush_drafts()?;
                let (client_id, blob) = self.rec.export_backup()?;
                let path = path.unwrap_or_else(|| PathBuf::from(backup::default_file_name(&client_id)));
                crate::kv::atomic_write_text(&path, &blob)?;
                println!("backup written to {}", path.display());
            }
            Command::Import(path) => {
                let b = backup::read_file(&path)?;
                self.flush_drafts()?;
                self.rec.import_backup(b)?;
                print!("{}", self.render());
            }
            Command::Client(id) => {
                self.flush_drafts()?;
                self.rec.switch_client(id);
                print!("{}", self.render());
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn flush_drafts(&mut self) -> Result<()> {
        let drafts = std::mem::take(&mut self.drafts);
        for (key, value) in drafts {
            self.rec.on_field_edit(key, value)?;
        }
        Ok(())
    }

    /// Commits drafts and pushes any pending change before leaving.
    pub fn finish(&mut self) -> Result<()> {
        self.flush_drafts()?;
        if self.rec.next_deadline().is_some() {
            self.rec.on_explicit_save()?;
        }
        Ok(())
    }

    /// Runs the editor until `quit` or end of input. The debounced sync fires
    /// while waiting for input.
    pub fn run(mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel::<String>();
        thread::spawn(move || {
            for line in io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        print!("{}", self.render());
        loop {
            print!("> ");
            let _ = io::stdout().flush();

            let line = match self.rec.next_deadline() {
                Some(deadline) => {
                    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(line) => Some(line),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(line) => Some(line),
                    Err(_) => break,
                },
            };

            if let Some(line) = line {
                let flow = parse_command(&line).and_then(|cmd| match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => Ok(Flow::Continue),
                });
                match flow {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => println!("ERROR: {e}"),
                }
            } else {
                println!();
            }
            let _ = self.rec.poll();
        }

        if let Err(e) = self.finish() {
            tracing::warn!(error = %e, "final save failed; answers remain in the local fallback");
        }
        Ok(())
    }
}
