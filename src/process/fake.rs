//! Scripted collaborator for tests.
//!
//! Commands are answered by a handler closure that sees the argument list
//! (program omitted). Every run, spawn, terminate and exec is recorded in a
//! shared [`Journal`] so tests can assert on ordering and counts.

use std::sync::{Arc, Mutex};

use super::{BackgroundProcess, CommandOutput, CommandSpec, ExitReport, ProcessRunner};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Run(String),
    Spawn(String),
    Terminate(String),
    Exec(String),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Argument lines of every completed command, in order
    pub(crate) fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Run(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Number of completed commands whose argument line starts with `prefix`
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

type Handler = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

pub(crate) struct FakeRunner {
    handler: Handler,
    journal: Journal,
    spawn_fails: bool,
    exits_immediately: bool,
}

impl FakeRunner {
    pub(crate) fn new(handler: impl Fn(&[String]) -> CommandOutput + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            journal: Journal::default(),
            spawn_fails: false,
            exits_immediately: false,
        }
    }

    /// Every command succeeds with empty output
    pub(crate) fn succeeding() -> Self {
        Self::new(|_| CommandOutput::ok(""))
    }

    pub(crate) fn spawn_fails(mut self) -> Self {
        self.spawn_fails = true;
        self
    }

    /// Spawned processes report as already exited
    pub(crate) fn exits_immediately(mut self) -> Self {
        self.exits_immediately = true;
        self
    }

    pub(crate) fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

fn line(command: &CommandSpec) -> String {
    command.get_args().join(" ")
}

#[async_trait::async_trait]
impl ProcessRunner for FakeRunner {
    async fn output(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.journal.push(Event::Run(line(command)));
        Ok((self.handler)(command.get_args()))
    }

    async fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        if self.spawn_fails {
            return Err(Error::Launch {
                program: command.program().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"),
            });
        }
        self.journal.push(Event::Spawn(line(command)));
        Ok(Box::new(FakeProcess {
            label: line(command),
            journal: self.journal.clone(),
            exited: self.exits_immediately,
        }))
    }

    fn exec(&self, command: &CommandSpec) -> Error {
        self.journal.push(Event::Exec(line(command)));
        Error::Handoff {
            program: command.program().to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "exec recorded by test runner"),
        }
    }
}

pub(crate) struct FakeProcess {
    label: String,
    journal: Journal,
    exited: bool,
}

#[async_trait::async_trait]
impl BackgroundProcess for FakeProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn id(&self) -> Option<u32> {
        None
    }

    fn try_exited(&mut self) -> Result<Option<ExitReport>> {
        Ok(self.exited.then_some(ExitReport { success: false, code: Some(1) }))
    }

    async fn wait(&mut self) -> Result<ExitReport> {
        if !self.exited {
            std::future::pending::<()>().await;
        }
        Ok(ExitReport { success: false, code: Some(1) })
    }

    async fn terminate(&mut self) -> Result<ExitReport> {
        self.journal.push(Event::Terminate(self.label.clone()));
        self.exited = true;
        Ok(ExitReport { success: false, code: None })
    }
}
