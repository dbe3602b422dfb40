use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use core_orchestrator::{Dashboard, DeletionRequest, FlowSource};
use core_types::{AuthStatus, FileArtifact, Flow, FlowPatch, MessageEntry};
use storage_sqlite::{RunId, TranscriptStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(no_binary_name = true, name = "")]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with username and password
    Login { username: String, password: String },
    /// Sign out and clear all local session state
    Logout,
    /// Open the flow selector and list flows
    Flows,
    /// Retry the last flow listing
    Retry,
    /// Make a flow the active scope (by id or name)
    Select {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        flow: Vec<String>,
    },
    /// Upload a .json/.yaml/.yml flow definition
    UploadFlow {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Upload a flow file named after the file, then activate it
    DropFlow { path: PathBuf },
    /// Rename a flow or change its description
    Rename {
        flow: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Ask to delete a flow; `confirm` carries it out
    DeleteFlow {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        flow: Vec<String>,
    },
    /// Confirm the pending flow deletion
    Confirm,
    /// List files of the active flow
    Files,
    /// Pick files for the next `upload` without arguments
    Stage { paths: Vec<PathBuf> },
    /// Upload the given files, or the staged ones, to the active flow
    Upload { paths: Vec<PathBuf> },
    /// Delete a file of the active flow by its stored path
    Rm { file_path: String },
    /// Send a chat message to the active flow
    Say {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        words: Vec<String>,
    },
    /// Show session, scope and backend health
    Status,
    /// List available embedding models
    Models,
    /// Print the conversation log
    Log {
        /// Read from the transcript archive instead
        #[arg(long)]
        archived: bool,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Leave the shell
    Quit,
}

pub struct Shell {
    dashboard: Arc<Dashboard>,
    transcripts: Option<TranscriptStore>,
    run_id: RunId,
    archived_seq: u64,
    shown_seq: u64,
    pending_deletion: Option<DeletionRequest>,
}

impl Shell {
    pub fn new(dashboard: Arc<Dashboard>, transcripts: Option<TranscriptStore>) -> Self {
        Self {
            dashboard,
            transcripts,
            run_id: RunId::new_v4(),
            archived_seq: 0,
            shown_seq: 0,
            pending_deletion: None,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        match self.dashboard.enter().await {
            AuthStatus::Authenticated => {
                let user = self.dashboard.session().user();
                let name = user.map(|user| user.username).unwrap_or_default();
                println!("Signed in as {name}. Type `help` for commands.");
            }
            _ => println!("Please sign in: login <username> <password>"),
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush().ok();
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.is_empty() {
                continue;
            }
            let command = match Line::try_parse_from(words) {
                Ok(line) => line.command,
                Err(err) => {
                    println!("{err}");
                    continue;
                }
            };
            if matches!(command, Command::Quit) {
                break;
            }

            // Anything but `confirm` drops the pending deletion.
            let pending = self.pending_deletion.take();
            self.execute(command, pending).await;
            self.show_new_entries();
            self.archive().await;
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command, pending: Option<DeletionRequest>) {
        match command {
            Command::Login { username, password } => {
                match self.dashboard.login(&username, &password).await {
                    Ok(AuthStatus::Authenticated) => println!("Signed in as {username}."),
                    Ok(_) => println!("Login did not produce a valid session."),
                    Err(err) => println!("Login failed: {err}"),
                }
            }
            Command::Logout => {
                self.dashboard.logout();
                if let Some(store) = &self.transcripts {
                    if let Err(err) = store.purge().await {
                        warn!(error = %err, "failed to purge transcript archive");
                    }
                }
                println!("Signed out.");
            }
            Command::Log { archived, limit } => self.print_log(archived, limit).await,
            command => {
                if self.dashboard.enter().await != AuthStatus::Authenticated {
                    println!("Session expired or missing. Please sign in.");
                    return;
                }
                self.dashboard_command(command, pending).await;
            }
        }
    }

    async fn dashboard_command(&mut self, command: Command, pending: Option<DeletionRequest>) {
        let dashboard = Arc::clone(&self.dashboard);
        match command {
            Command::Flows => {
                if dashboard.open_flow_selector().await.is_ok() {
                    self.print_flows();
                } else {
                    self.print_flow_banner();
                }
            }
            Command::Retry => {
                if dashboard.retry_flows().await.is_ok() {
                    self.print_flows();
                } else {
                    self.print_flow_banner();
                }
            }
            Command::Select { flow } => {
                if let Some(flow) = self.resolve_flow(&flow.join(" ")).await {
                    dashboard.select_flow(&flow);
                }
            }
            Command::UploadFlow {
                path,
                name,
                description,
            } => {
                let source = match read_artifact(&path).await {
                    Ok(artifact) => FlowSource::File(artifact),
                    Err(err) => FlowSource::Invalid(format!("{err:#}")),
                };
                dashboard
                    .upload_flow(source, name.as_deref(), description.as_deref())
                    .await
                    .ok();
            }
            Command::DropFlow { path } => {
                dashboard.upload_flow_file(&path).await.ok();
            }
            Command::Rename {
                flow,
                name,
                description,
            } => {
                if let Some(flow) = self.resolve_flow(&flow).await {
                    let patch = FlowPatch { name, description };
                    if let Err(err) = dashboard.update_flow(&flow.id, &patch).await {
                        debug!(error = %err, "rename rejected");
                        println!("{err}");
                    }
                }
            }
            Command::DeleteFlow { flow } => {
                if let Some(flow) = self.resolve_flow(&flow.join(" ")).await {
                    let request = dashboard.request_flow_deletion(flow);
                    println!("{} Type `confirm` to proceed.", request.prompt());
                    self.pending_deletion = Some(request);
                }
            }
            Command::Confirm => match pending {
                Some(request) => {
                    dashboard.confirm_flow_deletion(request).await.ok();
                }
                None => println!("Nothing to confirm."),
            },
            Command::Files => {
                dashboard.refresh_files().await.ok();
                self.print_files();
            }
            Command::Stage { paths } => match read_artifacts(&paths).await {
                Ok(files) => {
                    dashboard.stage_files(files);
                    let staged = dashboard.files().panel().staged;
                    println!("Staged: {}", staged.join(", "));
                }
                Err(err) => println!("{err:#}"),
            },
            Command::Upload { paths } => {
                let result = if paths.is_empty() {
                    dashboard.upload_staged_files().await
                } else {
                    match read_artifacts(&paths).await {
                        Ok(files) => dashboard.upload_files(files).await,
                        Err(err) => {
                            println!("{err:#}");
                            return;
                        }
                    }
                };
                if let Err(err @ core_types::ClientError::Validation(_)) = result {
                    println!("{err}");
                }
            }
            Command::Rm { file_path } => {
                dashboard.delete_file(&file_path).await.ok();
            }
            Command::Say { words } => {
                if let Err(err @ core_types::ClientError::Validation(_)) =
                    dashboard.send_message(&words.join(" ")).await
                {
                    println!("{err}");
                }
            }
            Command::Status => self.print_status().await,
            Command::Models => {
                let models = dashboard.list_embedding_models().await;
                if models.is_empty() {
                    println!("No embedding models available.");
                }
                for model in models {
                    println!("  {model}");
                }
            }
            Command::Login { .. } | Command::Logout | Command::Log { .. } | Command::Quit => {}
        }
    }

    async fn resolve_flow(&self, key: &str) -> Option<Flow> {
        if self.dashboard.flows().flows().is_empty() {
            self.dashboard.open_flow_selector().await.ok();
            self.dashboard.flows().close_selector();
        }
        let flows = self.dashboard.flows().flows();
        let found = flows
            .iter()
            .find(|flow| flow.id.as_str() == key)
            .or_else(|| flows.iter().find(|flow| flow.name.eq_ignore_ascii_case(key)))
            .cloned();
        if found.is_none() {
            println!("No flow matches `{key}`. Run `flows` to list them.");
        }
        found
    }

    fn print_flows(&self) {
        let panel = self.dashboard.flows().panel();
        if let Some(banner) = panel.banner() {
            println!("{banner}");
            return;
        }
        let active = self.dashboard.active_flow();
        for flow in panel.list.loaded().into_iter().flatten() {
            let marker = if active.is_flow(&flow.id) { "*" } else { " " };
            let description = flow.description.as_deref().unwrap_or_default();
            println!("{marker} {}  {}  {description}", flow.id, flow.name);
        }
    }

    fn print_flow_banner(&self) {
        if let Some(banner) = self.dashboard.flows().panel().banner() {
            println!("{banner} (type `retry`)");
        }
    }

    fn print_files(&self) {
        let panel = self.dashboard.files().panel();
        if let Some(banner) = panel.banner() {
            println!("{banner}");
        }
        if panel.files.is_empty() && panel.list_error.is_none() {
            println!("No files in this flow.");
        }
        for file in &panel.files {
            println!(
                "  {}  {} bytes  {}",
                file.display_name(),
                file.file_size,
                file.file_path
            );
        }
    }

    async fn print_status(&self) {
        let dashboard = &self.dashboard;
        let user = dashboard.session().user().map(|user| user.username);
        println!("User:   {}", user.unwrap_or_else(|| "-".to_string()));
        match dashboard.active_flow().flow_id() {
            Some(id) => {
                let name = dashboard
                    .active_flow_record()
                    .map(|flow| flow.name)
                    .unwrap_or_else(|| "(not in loaded list)".to_string());
                println!("Flow:   {id} {name}");
                let status = dashboard.files().check_server_status(id).await;
                match status {
                    Some(status) => println!(
                        "Ollama: {}  Qdrant: {}",
                        connected(status.ollama_connected),
                        connected(status.qdrant_connected)
                    ),
                    None => println!("Backend health unavailable."),
                }
            }
            None => println!("Flow:   none selected"),
        }
    }

    async fn print_log(&self, archived: bool, limit: u32) {
        if !archived {
            for entry in self.dashboard.log().entries() {
                print_entry(&entry);
            }
            return;
        }
        let Some(store) = &self.transcripts else {
            println!("Transcript archive is disabled.");
            return;
        };
        match store.recent(limit).await {
            Ok(entries) => {
                for archived in entries {
                    print!("{} ", archived.entry.created_at.format("%Y-%m-%d %H:%M"));
                    print_entry(&archived.entry);
                }
            }
            Err(err) => println!("Could not read archive: {err:#}"),
        }
    }

    fn show_new_entries(&mut self) {
        for entry in self.dashboard.log().entries_after(self.shown_seq) {
            print_entry(&entry);
            self.shown_seq = entry.seq;
        }
    }

    async fn archive(&mut self) {
        let Some(store) = &self.transcripts else {
            return;
        };
        let entries = self.dashboard.log().entries_after(self.archived_seq);
        let Some(last) = entries.last().map(|entry| entry.seq) else {
            return;
        };
        let active = self.dashboard.active_flow();
        match store
            .append_entries(self.run_id, active.flow_id(), &entries)
            .await
        {
            Ok(written) => {
                debug!(written, "log entries archived");
                self.archived_seq = last;
            }
            Err(err) => warn!(error = %err, "failed to archive log entries"),
        }
    }
}

fn print_entry(entry: &MessageEntry) {
    println!("[{}] {}", entry.sender.as_str(), entry.text);
}

fn connected(value: bool) -> &'static str {
    if value { "connected" } else { "disconnected" }
}

async fn read_artifact(path: &Path) -> Result<FileArtifact> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} is not a file", path.display()))?;
    Ok(FileArtifact::new(file_name, bytes))
}

async fn read_artifacts(paths: &[PathBuf]) -> Result<Vec<FileArtifact>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(read_artifact(path).await?);
    }
    Ok(files)
}
