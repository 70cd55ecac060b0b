//! Scripted collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::command::{CommandRunner, ToolOutput};
use super::error::Result;
use crate::app::system_proxy::SettingsStore;

type Responder = Box<dyn Fn(&str, &[&str]) -> Result<ToolOutput> + Send + Sync>;

/// Answers tool invocations from a closure and records every call.
pub struct ScriptedRunner {
    responder: Responder,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[&str]) -> Result<ToolOutput> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap().push(line);
        (self.responder)(program, args)
    }
}

pub fn ok_output(stdout: &str) -> ToolOutput {
    ToolOutput {
        success: true,
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed_output(code: i32, stderr: &str) -> ToolOutput {
    ToolOutput {
        success: false,
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// In-memory stand-in for the per-user Internet Settings key.
#[derive(Default)]
pub struct MemoryStore {
    pub dwords: Mutex<HashMap<String, u32>>,
    pub strings: Mutex<HashMap<String, String>>,
    pub writes: Mutex<Vec<String>>,
    pub broadcasts: Mutex<u32>,
}

impl MemoryStore {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn read_dword(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.dwords.lock().unwrap().get(name).copied())
    }

    async fn read_string(&self, name: &str) -> Result<Option<String>> {
        Ok(self.strings.lock().unwrap().get(name).cloned())
    }

    async fn write_dword(&self, name: &str, value: u32) -> Result<()> {
        self.writes.lock().unwrap().push(format!("{}={}", name, value));
        self.dwords.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    async fn write_string(&self, name: &str, value: &str) -> Result<()> {
        self.writes.lock().unwrap().push(format!("{}={}", name, value));
        self.strings
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn broadcast_change(&self) -> Result<()> {
        *self.broadcasts.lock().unwrap() += 1;
        Ok(())
    }
}
