//! In-memory container runtime for tests.
//!
//! Models images and containers, and behind `screen -X stuff` runs a tiny
//! shell emulation (cd, pwd, export, echo, printf) so the session protocol
//! can be exercised end to end without Docker.

use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::error::SandboxError;
use super::lifecycle::ContainerHandle;
use super::runtime::{
    BuildProgress, BuildRequest, ContainerRuntime, ContainerSpec, ContainerState,
    ContainerSummary, ImageInfo, RuntimeResult,
};
use super::{CommandEncoding, NetworkPolicy, SandboxIdentity, SandboxOptions, Timings};

/// Options with no artificial delays, for tests.
pub(crate) fn test_options(project_dir: &Path) -> SandboxOptions {
    SandboxOptions {
        identity: SandboxIdentity::default(),
        project_dir: project_dir.to_path_buf(),
        dockerfile: project_dir.join("Dockerfile"),
        policy: NetworkPolicy::WebOnly,
        ports: vec![80, 443],
        encoding: CommandEncoding::Base64,
        timings: Timings {
            settle: Duration::ZERO,
            keystroke_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        },
        lock_path: project_dir.join(".shellbox.lock"),
    }
}

#[derive(Debug, Default)]
struct FakeShell {
    cwd: String,
    env: HashMap<String, String>,
}

impl FakeShell {
    fn new(cwd: &str) -> Self {
        Self {
            cwd: cwd.to_string(),
            env: HashMap::new(),
        }
    }

    fn run_line(&mut self, line: &str) -> String {
        let words: Vec<String> = shell_words::split(line)
            .unwrap_or_else(|_| line.split_whitespace().map(String::from).collect())
            .into_iter()
            .map(|w| match w.strip_prefix('$') {
                Some(var) => self.env.get(var).cloned().unwrap_or_default(),
                None => w,
            })
            .collect();

        let Some((program, args)) = words.split_first() else {
            return String::new();
        };

        match program.as_str() {
            "cd" => {
                self.cwd = args.first().cloned().unwrap_or_else(|| "/root".to_string());
                String::new()
            }
            "pwd" => format!("{}\n", self.cwd),
            "export" => {
                for assignment in args {
                    if let Some((key, value)) = assignment.split_once('=') {
                        self.env.insert(key.to_string(), value.to_string());
                    }
                }
                String::new()
            }
            "echo" => format!("{}\n", args.join(" ")),
            "printf" => args.join(" "),
            "true" | "false" => String::new(),
            other => format!("bash: {other}: command not found\n"),
        }
    }

    fn run(&mut self, script: &str) -> String {
        script.lines().map(|line| self.run_line(line)).collect()
    }
}

#[derive(Debug)]
struct MockContainer {
    id: String,
    name: String,
    image: String,
    state: ContainerState,
    auto_remove: bool,
    history: String,
    /// Next history contents and how many reads still see the old one.
    staged: Option<(String, usize)>,
    shell: FakeShell,
}

#[derive(Debug, Default)]
struct MockState {
    images: Vec<ImageInfo>,
    containers: Vec<MockContainer>,
    next_id: usize,
    builds: Vec<(String, String)>,
    specs: Vec<ContainerSpec>,
    stopped: Vec<String>,
    removed: Vec<String>,
    execs: Vec<Vec<String>>,
    build_error: Option<String>,
    fail_starts: bool,
    hang: bool,
    session_lost: bool,
    completion_delay: usize,
}

/// Fake Docker daemon.
#[derive(Debug)]
pub(crate) struct MockRuntime {
    identity: SandboxIdentity,
    state: Mutex<MockState>,
    history_reads: AtomicUsize,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            identity: SandboxIdentity::default(),
            state: Mutex::new(MockState::default()),
            history_reads: AtomicUsize::new(0),
        }
    }

    pub fn add_image(&self, tag: &str) {
        let mut state = self.state.lock().unwrap();
        let id = format!("sha256:{:04}", state.images.len());
        state.images.push(ImageInfo {
            id,
            repo_tags: vec![tag.to_string()],
            size: Some(75 * 1024 * 1024),
        });
    }

    pub fn fail_builds(&self, message: &str) {
        self.state.lock().unwrap().build_error = Some(message.to_string());
    }

    pub fn fail_starts(&self) {
        self.state.lock().unwrap().fail_starts = true;
    }

    /// Commands never finish: history is left untouched.
    pub fn hang_commands(&self) {
        self.state.lock().unwrap().hang = true;
    }

    /// The screen session has exited, as after `exit` typed into it.
    pub fn lose_session(&self) {
        self.state.lock().unwrap().session_lost = true;
    }

    /// Command results become visible only after `reads` history reads.
    pub fn delay_completion(&self, reads: usize) {
        self.state.lock().unwrap().completion_delay = reads;
    }

    fn spawn(&self, name: &str, state: ContainerState) -> ContainerHandle {
        let mut guard = self.state.lock().unwrap();
        guard.next_id += 1;
        let id = format!("container-{}", guard.next_id);
        guard.containers.push(MockContainer {
            id: id.clone(),
            name: name.to_string(),
            image: self.identity.image.clone(),
            state,
            auto_remove: false,
            history: String::new(),
            staged: None,
            shell: FakeShell::new("/"),
        });
        ContainerHandle {
            id,
            name: name.to_string(),
        }
    }

    pub fn spawn_running(&self, name: &str) -> ContainerHandle {
        self.spawn(name, ContainerState::Running)
    }

    pub fn spawn_stopped(&self, name: &str) -> ContainerHandle {
        self.spawn(name, ContainerState::Stopped)
    }

    pub fn build_count(&self) -> usize {
        self.state.lock().unwrap().builds.len()
    }

    /// Tag and Dockerfile name of the last build.
    pub fn last_build(&self) -> Option<(String, String)> {
        self.state.lock().unwrap().builds.last().cloned()
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().unwrap().specs.len()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state.lock().unwrap().specs.last().cloned()
    }

    pub fn container_count(&self, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.containers.iter().filter(|c| c.name == name).count()
    }

    pub fn running_count(&self, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .filter(|c| c.name == name && c.state == ContainerState::Running)
            .count()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().execs.clone()
    }

    pub fn history_reads(&self) -> usize {
        self.history_reads.load(Ordering::SeqCst)
    }

    /// History file of the first running container.
    pub fn raw_history(&self) -> String {
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .find(|c| c.state == ContainerState::Running)
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }

    /// Reverses screen escaping.
    fn unescape(keys: &str) -> String {
        let mut out = String::new();
        let mut chars = keys.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Splits a composite line into the command text and its token.
    fn parse_composite(&self, line: &str) -> Option<(String, String)> {
        let marker = format!(" > {} 2>&1 && echo ", self.identity.history_path);
        let pos = line.rfind(&marker)?;
        let payload = &line[..pos];
        let token = line[pos + marker.len()..].split(" >> ").next()?.to_string();

        let suffix = format!(
            " | base64 -d > {0} && . {0}",
            self.identity.script_path
        );
        let command = match payload
            .strip_prefix("echo ")
            .and_then(|rest| rest.strip_suffix(&suffix))
        {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .ok()?;
                String::from_utf8(bytes).ok()?
            }
            None => payload.to_string(),
        };

        Some((command, token))
    }

    fn container_mut<'s>(
        state: &'s mut MockState,
        id: &str,
    ) -> RuntimeResult<&'s mut MockContainer> {
        state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SandboxError::container_failed(format!("no such container: {id}")))
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_images(&self) -> RuntimeResult<Vec<ImageInfo>> {
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn build_image(
        &self,
        request: BuildRequest,
        progress: BuildProgress<'_>,
    ) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.build_error {
            return Err(SandboxError::build_failed(message.clone()));
        }

        progress("Step 1/1 : mock build");
        state
            .builds
            .push((request.tag.clone(), request.dockerfile.clone()));
        let id = format!("sha256:built{}", state.builds.len());
        state.images.push(ImageInfo {
            id,
            repo_tags: vec![request.tag],
            size: None,
        });
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> RuntimeResult<ImageInfo> {
        let state = self.state.lock().unwrap();
        state
            .images
            .iter()
            .rev()
            .find(|img| img.has_tag(reference))
            .cloned()
            .ok_or_else(|| SandboxError::image_not_found(reference))
    }

    async fn list_containers(&self, name: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| c.name == name)
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: c.state,
                created: Some(1_700_000_000),
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(SandboxError::container_failed(format!(
                "name {} is already in use",
                spec.name
            )));
        }

        state.next_id += 1;
        let id = format!("container-{}", state.next_id);
        state.specs.push(spec.clone());
        state.containers.push(MockContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: ContainerState::Stopped,
            auto_remove: spec.auto_remove,
            history: String::new(),
            staged: None,
            shell: FakeShell::new(&spec.bind_dir.display().to_string()),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_starts {
            return Err(SandboxError::container_failed("failed to start container"));
        }
        Self::container_mut(&mut state, id)?.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.stopped.push(id.to_string());
        let auto_remove = match Self::container_mut(&mut state, id) {
            Ok(container) => {
                container.state = ContainerState::Stopped;
                container.auto_remove
            }
            Err(_) => return Ok(()),
        };
        if auto_remove {
            state.containers.retain(|c| c.id != id);
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.removed.push(id.to_string());
        state.containers.retain(|c| c.id != id);
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: Vec<String>) -> RuntimeResult<String> {
        let mut state = self.state.lock().unwrap();
        state.execs.push(cmd.clone());
        let hang = state.hang;
        let session_lost = state.session_lost;
        let delay = state.completion_delay;
        let container = Self::container_mut(&mut state, id)?;
        if container.state != ContainerState::Running {
            return Err(SandboxError::container_failed(format!(
                "container {id} is not running"
            )));
        }

        match cmd.first().map(String::as_str) {
            Some("screen") if cmd.get(4).map(String::as_str) == Some("stuff") => {
                let keys = cmd.get(5).map(String::as_str).unwrap_or_default();
                let line = Self::unescape(keys.trim_end_matches('\n'));
                if session_lost {
                    return Ok("No screen session found.\n".to_string());
                }
                if hang {
                    return Ok(String::new());
                }
                if let Some((command, token)) = self.parse_composite(&line) {
                    let output = container.shell.run(&command);
                    let next = format!("{output}{token}\n");
                    if delay == 0 {
                        container.history = next;
                    } else {
                        container.staged = Some((next, delay));
                    }
                }
                Ok(String::new())
            }
            Some("cat") => {
                self.history_reads.fetch_add(1, Ordering::SeqCst);
                if let Some((next, remaining)) = container.staged.take() {
                    if remaining == 0 {
                        container.history = next;
                    } else {
                        container.staged = Some((next, remaining - 1));
                    }
                }
                Ok(container.history.clone())
            }
            _ => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_shell_state() {
        let mut shell = FakeShell::new("/work");
        assert_eq!(shell.run("pwd"), "/work\n");
        assert_eq!(shell.run("export a=1"), "");
        assert_eq!(shell.run("echo $a"), "1\n");
        assert_eq!(shell.run("cd '/tmp/with space'\npwd"), "/tmp/with space\n");
    }

    #[test]
    fn test_unescape_reverses_screen_escaping() {
        assert_eq!(MockRuntime::unescape("echo \\$a \\^ \\\\n"), "echo $a ^ \\n");
    }
}
