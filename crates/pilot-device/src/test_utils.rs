//! Test utilities for device drivers
//!
//! [`ScriptedRunner`] answers commands from canned replies and records every
//! call; [`FakeConsole`] stands in for the emulator console.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use pilot_core::prelude::*;

use crate::console::EmulatorConsole;
use crate::exec::{BackgroundProcess, CommandOutput, CommandRunner, CommandSpec, ExecOptions};

/// One recorded `execute` call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Display form of the command line
    pub command: String,
    pub options: ExecOptions,
}

#[derive(Debug, Clone)]
enum Reply {
    Stdout(String),
    Failure(String),
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

#[derive(Debug, Default)]
struct ScriptState {
    rules: Vec<Rule>,
    calls: Vec<RecordedCall>,
    spawned: Vec<String>,
}

/// Command runner answering from a script.
///
/// A command matches a rule when its display form contains the rule's
/// pattern; the most recently added matching rule wins. Rules with several
/// replies hand them out in order and then repeat the last one. Unmatched
/// commands succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_rule(&self, pattern: &str, replies: Vec<Reply>) {
        let mut state = self.state.lock().unwrap();
        state.rules.push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
    }

    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.add_rule(pattern, vec![Reply::Stdout(stdout.to_string())]);
    }

    pub fn respond_sequence<'a>(&self, pattern: &str, stdouts: impl IntoIterator<Item = &'a str>) {
        let replies = stdouts
            .into_iter()
            .map(|s| Reply::Stdout(s.to_string()))
            .collect();
        self.add_rule(pattern, replies);
    }

    /// Every attempt of a matching command fails with `stderr`
    pub fn fail(&self, pattern: &str, stderr: &str) {
        self.add_rule(pattern, vec![Reply::Failure(stderr.to_string())]);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    /// Whether any executed command contains `fragment`
    pub fn ran(&self, fragment: &str) -> bool {
        self.commands().iter().any(|c| c.contains(fragment))
    }

    pub fn spawned(&self) -> Vec<String> {
        self.state.lock().unwrap().spawned.clone()
    }

    fn next_reply(&self, command: &str) -> Option<Reply> {
        let mut state = self.state.lock().unwrap();
        let rule = state
            .rules
            .iter_mut()
            .rev()
            .find(|rule| command.contains(&rule.pattern))?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

impl CommandRunner for ScriptedRunner {
    async fn execute(&self, spec: &CommandSpec, options: &ExecOptions) -> Result<CommandOutput> {
        let command = spec.to_string();
        self.state.lock().unwrap().calls.push(RecordedCall {
            command: command.clone(),
            options: options.clone(),
        });

        match self.next_reply(&command) {
            Some(Reply::Stdout(stdout)) => Ok(CommandOutput::new(stdout)),
            Some(Reply::Failure(stderr)) => Err(Error::CommandFailed {
                command,
                exit_code: Some(1),
                stderr,
                attempts: options.attempts(),
            }),
            None => Ok(CommandOutput::default()),
        }
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<BackgroundProcess> {
        let command = spec.to_string();
        self.state.lock().unwrap().spawned.push(command.clone());
        Ok(BackgroundProcess::detached(command))
    }

    /// Writes the matching scripted stdout into `path`
    fn spawn_to_file(&self, spec: &CommandSpec, path: &Path) -> Result<BackgroundProcess> {
        let command = spec.to_string();
        let contents = match self.next_reply(&command) {
            Some(Reply::Stdout(stdout)) => stdout,
            Some(Reply::Failure(stderr)) => {
                return Err(Error::CommandSpawn {
                    command,
                    reason: stderr,
                })
            }
            None => String::new(),
        };
        std::fs::write(path, contents)?;
        self.state.lock().unwrap().spawned.push(command.clone());
        Ok(BackgroundProcess::detached(command))
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> Result<()> {
        self.state.lock().unwrap().spawned.push(spec.to_string());
        Ok(())
    }
}

/// Emulator console answering with a fixed AVD name
#[derive(Debug, Clone, Default)]
pub struct FakeConsole {
    name: Option<String>,
    ports: Arc<Mutex<Vec<u16>>>,
}

impl FakeConsole {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ports: Arc::default(),
        }
    }

    /// A console whose every connection fails
    pub fn failing() -> Self {
        Self::default()
    }

    /// Ports connected to, one entry per console session
    pub fn connected_ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }
}

impl EmulatorConsole for FakeConsole {
    async fn avd_name(&self, port: u16) -> Result<String> {
        self.ports.lock().unwrap().push(port);
        self.name
            .clone()
            .ok_or_else(|| Error::telnet(format!("connection refused on port {port}")))
    }
}

/// Console mapping ports to distinct AVD names
#[derive(Debug, Clone, Default)]
pub struct MappedConsole {
    names: Vec<(u16, String)>,
    ports: Arc<Mutex<Vec<u16>>>,
}

impl MappedConsole {
    pub fn new<'a>(names: impl IntoIterator<Item = (u16, &'a str)>) -> Self {
        Self {
            names: names
                .into_iter()
                .map(|(port, name)| (port, name.to_string()))
                .collect(),
            ports: Arc::default(),
        }
    }

    pub fn connected_ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }
}

impl EmulatorConsole for MappedConsole {
    async fn avd_name(&self, port: u16) -> Result<String> {
        self.ports.lock().unwrap().push(port);
        self.names
            .iter()
            .find(|(p, _)| *p == port)
            .map(|(_, name)| name.clone())
            .ok_or_else(|| Error::telnet(format!("no emulator on port {port}")))
    }
}
