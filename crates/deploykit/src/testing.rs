//! Scripted connector and session for tests
//!
//! Every device gets a [`DeviceScript`] describing how each step answers.
//! The connector keeps a ledger of opens, closes and calls so tests can
//! check that every opened session was closed and which steps ran.

use crate::cancel::CancelToken;
use crate::context::{Connector, Renderer, Session};
use crate::error::{ConnectError, ProtocolError, RenderError};
use crate::types::{
    Credentials, Datastore, DeviceTarget, RenderedConfig, RpcError, RpcReply, Step,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// How a scripted step answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Ok,
    /// Reply with an rpc-error
    Reject,
    /// No reply before the operation timeout
    Timeout,
    /// Panic inside the session call
    Panic,
}

#[derive(Debug, Clone)]
pub struct DeviceScript {
    pub connect: bool,
    pub lock: Behavior,
    pub push: Behavior,
    pub commit: Behavior,
    pub unlock: Behavior,
    /// Sleep before answering each step
    pub delay: Duration,
    /// Cancel the token right after this step answers
    pub cancel_after: Option<(Step, CancelToken)>,
}

impl Default for DeviceScript {
    fn default() -> Self {
        Self {
            connect: true,
            lock: Behavior::Ok,
            push: Behavior::Ok,
            commit: Behavior::Ok,
            unlock: Behavior::Ok,
            delay: Duration::ZERO,
            cancel_after: None,
        }
    }
}

impl DeviceScript {
    fn behavior(&self, step: Step) -> Behavior {
        match step {
            Step::Lock => self.lock,
            Step::Push => self.push,
            Step::Commit => self.commit,
            Step::Unlock => self.unlock,
        }
    }
}

#[derive(Debug, Default)]
struct DeviceLedger {
    opens: usize,
    closes: usize,
    calls: Vec<Step>,
}

#[derive(Debug, Default)]
struct Ledger {
    devices: HashMap<String, DeviceLedger>,
    open_now: usize,
    peak_open: usize,
}

fn lock_ledger(ledger: &Mutex<Ledger>) -> MutexGuard<'_, Ledger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: HashMap<String, DeviceScript>,
    ledger: Arc<Mutex<Ledger>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, name: &str, script: DeviceScript) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }

    pub fn opens(&self, name: &str) -> usize {
        lock_ledger(&self.ledger)
            .devices
            .get(name)
            .map_or(0, |d| d.opens)
    }

    pub fn closes(&self, name: &str) -> usize {
        lock_ledger(&self.ledger)
            .devices
            .get(name)
            .map_or(0, |d| d.closes)
    }

    pub fn calls(&self, name: &str) -> Vec<Step> {
        lock_ledger(&self.ledger)
            .devices
            .get(name)
            .map(|d| d.calls.clone())
            .unwrap_or_default()
    }

    /// Most sessions that were open at the same time
    pub fn peak_open(&self) -> usize {
        lock_ledger(&self.ledger).peak_open
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    fn open(
        &self,
        device: &DeviceTarget,
        _credentials: &Credentials,
    ) -> Result<ScriptedSession, ConnectError> {
        let script = self.scripts.get(&device.name).cloned().unwrap_or_default();
        if !script.connect {
            return Err(ConnectError::Unreachable {
                address: device.address.clone(),
                message: "connection refused".into(),
            });
        }

        let mut ledger = lock_ledger(&self.ledger);
        ledger.devices.entry(device.name.clone()).or_default().opens += 1;
        ledger.open_now += 1;
        ledger.peak_open = ledger.peak_open.max(ledger.open_now);
        drop(ledger);

        Ok(ScriptedSession {
            device: device.name.clone(),
            script,
            ledger: Arc::clone(&self.ledger),
            closed: false,
        })
    }
}

pub struct ScriptedSession {
    device: String,
    script: DeviceScript,
    ledger: Arc<Mutex<Ledger>>,
    closed: bool,
}

impl ScriptedSession {
    fn answer(&mut self, step: Step) -> Result<RpcReply, ProtocolError> {
        if !self.script.delay.is_zero() {
            thread::sleep(self.script.delay);
        }
        lock_ledger(&self.ledger)
            .devices
            .entry(self.device.clone())
            .or_default()
            .calls
            .push(step);

        let answer = match self.script.behavior(step) {
            Behavior::Ok => Ok(RpcReply::ok("<rpc-reply><ok/></rpc-reply>")),
            Behavior::Reject => Err(RpcError {
                tag: "operation-failed".into(),
                severity: "error".into(),
                message: Some(format!("{step} refused by device")),
            }),
            Behavior::Timeout => return Err(ProtocolError::Timeout { secs: 60 }),
            Behavior::Panic => panic!("scripted panic during {step}"),
        };

        if let Some((after, token)) = &self.script.cancel_after {
            if *after == step {
                token.cancel();
            }
        }

        Ok(answer.unwrap_or_else(|error| {
            RpcReply::rejected("<rpc-reply><rpc-error/></rpc-reply>", vec![error])
        }))
    }
}

impl Session for ScriptedSession {
    fn lock(&mut self, _datastore: Datastore) -> Result<RpcReply, ProtocolError> {
        self.answer(Step::Lock)
    }

    fn push(
        &mut self,
        _datastore: Datastore,
        _config: &RenderedConfig,
    ) -> Result<RpcReply, ProtocolError> {
        self.answer(Step::Push)
    }

    fn commit(&mut self) -> Result<RpcReply, ProtocolError> {
        self.answer(Step::Commit)
    }

    fn unlock(&mut self, _datastore: Datastore) -> Result<RpcReply, ProtocolError> {
        self.answer(Step::Unlock)
    }

    fn close(&mut self) {
        // Every call is counted so a double close shows up in the ledger
        let mut ledger = lock_ledger(&self.ledger);
        ledger.devices.entry(self.device.clone()).or_default().closes += 1;
        if !self.closed {
            self.closed = true;
            ledger.open_now = ledger.open_now.saturating_sub(1);
        }
    }
}

/// Renderer that produces a fixed document for every device
pub fn ok_renderer() -> impl Renderer {
    |device: &DeviceTarget| -> Result<RenderedConfig, RenderError> {
        Ok(RenderedConfig::new(
            device.name.as_str(),
            format!("<config><hostname>{}</hostname></config>", device.name),
        ))
    }
}
