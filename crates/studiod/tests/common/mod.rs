//! Scripted collaborators for driving a daemon tick by tick.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use studiod::{
    AppProcess, AppSignal, Backends, EventSink, JsonCodec, LaunchRequest, Launcher, LinkPort,
    ManualClock, Notifier, ProxyError, ServerEvent, ServerParams, ServerProxy, Studio,
    StudioDaemon, StudioEvent, StudioSettings, Urgency,
};
use tempfile::TempDir;

/// What the scripted server did and will do
#[derive(Default)]
pub struct ServerState {
    pub started: bool,
    /// Never report start/stop transitions
    pub silent: bool,
    /// Stop requests error out, though the server still stops
    pub fail_stop_request: bool,
    pub start_requests: u32,
    pub stop_requests: u32,
    pub links: BTreeSet<LinkPort>,
    pub params: ServerParams,
    pub events: VecDeque<ServerEvent>,
}

impl ServerState {
    /// Server went down on its own.
    pub fn crash(&mut self) {
        self.started = false;
        self.events.push_back(ServerEvent::Stopped);
    }
}

pub struct ScriptedServer {
    state: Rc<RefCell<ServerState>>,
}

impl ServerProxy for ScriptedServer {
    fn start_server(&mut self) -> Result<(), ProxyError> {
        let mut state = self.state.borrow_mut();
        state.start_requests += 1;
        if !state.silent {
            state.started = true;
            state.events.push_back(ServerEvent::Started);
        }
        Ok(())
    }

    fn stop_server(&mut self) -> Result<(), ProxyError> {
        let mut state = self.state.borrow_mut();
        state.stop_requests += 1;
        state.links.clear();
        if state.fail_stop_request {
            state.started = false;
            return Err(ProxyError::Request {
                request: "stop",
                message: "timed out".to_string(),
            });
        }
        if !state.silent {
            state.started = false;
            state.events.push_back(ServerEvent::Stopped);
        }
        Ok(())
    }

    fn is_started(&mut self) -> Result<bool, ProxyError> {
        Ok(self.state.borrow().started)
    }

    fn parameters(&mut self) -> Result<ServerParams, ProxyError> {
        Ok(self.state.borrow().params.clone())
    }

    fn get_param(&mut self, path: &str) -> Result<Option<String>, ProxyError> {
        Ok(self.state.borrow().params.get(path).cloned())
    }

    fn set_param(&mut self, path: &str, value: &str) -> Result<(), ProxyError> {
        self.state
            .borrow_mut()
            .params
            .insert(path.to_string(), value.to_string());
        Ok(())
    }

    fn reset_all_params(&mut self) -> Result<(), ProxyError> {
        self.state.borrow_mut().params.clear();
        Ok(())
    }

    fn create_link(&mut self, port: &LinkPort) -> Result<(), ProxyError> {
        self.state.borrow_mut().links.insert(port.clone());
        Ok(())
    }

    fn destroy_link(&mut self, port: &LinkPort) -> Result<(), ProxyError> {
        self.state.borrow_mut().links.remove(port);
        Ok(())
    }

    fn take_events(&mut self) -> Vec<ServerEvent> {
        self.state.borrow_mut().events.drain(..).collect()
    }
}

#[derive(Default)]
pub struct AppState {
    pub next_pid: u32,
    pub signals: Vec<(u32, AppSignal)>,
    pub exited: HashSet<u32>,
    /// Processes exit as soon as they are asked to terminate
    pub exit_on_terminate: bool,
}

struct FakeProcess {
    pid: u32,
    state: Rc<RefCell<AppState>>,
}

impl AppProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn signal(&mut self, signal: AppSignal) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.signals.push((self.pid, signal));
        let exits = match signal {
            AppSignal::Kill => true,
            AppSignal::Terminate => state.exit_on_terminate,
            AppSignal::Save => false,
        };
        if exits {
            state.exited.insert(self.pid);
        }
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.state.borrow().exited.contains(&self.pid).then_some(0))
    }
}

pub struct FakeLauncher {
    state: Rc<RefCell<AppState>>,
}

impl Launcher for FakeLauncher {
    fn launch(&mut self, _request: LaunchRequest<'_>) -> io::Result<Box<dyn AppProcess>> {
        let mut state = self.state.borrow_mut();
        state.next_pid += 1;
        Ok(Box::new(FakeProcess {
            pid: 4000 + state.next_pid,
            state: self.state.clone(),
        }))
    }
}

pub struct RecordingNotifier {
    notes: Rc<RefCell<Vec<(Urgency, String)>>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, urgency: Urgency, title: &str, _message: &str) {
        self.notes.borrow_mut().push((urgency, title.to_string()));
    }
}

pub struct RecordingSink {
    events: Rc<RefCell<Vec<StudioEvent>>>,
}

impl EventSink for RecordingSink {
    fn publish(&mut self, event: StudioEvent) {
        self.events.borrow_mut().push(event);
    }
}

pub struct Harness {
    pub daemon: StudioDaemon,
    pub server: Rc<RefCell<ServerState>>,
    pub apps: Rc<RefCell<AppState>>,
    pub notes: Rc<RefCell<Vec<(Urgency, String)>>>,
    pub events: Rc<RefCell<Vec<StudioEvent>>>,
    pub clock: ManualClock,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let server = Rc::new(RefCell::new(ServerState::default()));
        let apps = Rc::new(RefCell::new(AppState::default()));
        let notes = Rc::new(RefCell::new(Vec::new()));
        let events = Rc::new(RefCell::new(Vec::new()));
        let clock = ManualClock::new();

        let settings = StudioSettings {
            studios_dir: dir.path().join("studios"),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            templates: studioconf::default_templates(),
        };
        let backends = Backends {
            server: Box::new(ScriptedServer {
                state: server.clone(),
            }),
            launcher: Box::new(FakeLauncher { state: apps.clone() }),
            codec: Box::new(JsonCodec),
            notifier: Box::new(RecordingNotifier {
                notes: notes.clone(),
            }),
            events: Box::new(RecordingSink {
                events: events.clone(),
            }),
            clock: Box::new(clock.clone()),
        };

        Self {
            daemon: StudioDaemon::new(Studio::new(settings, backends)),
            server,
            apps,
            notes,
            events,
            clock,
            dir,
        }
    }

    /// Tick until the queue drains. Returns false if any tick failed.
    pub fn settle(&mut self) -> bool {
        let mut ok = true;
        for _ in 0..20 {
            ok &= self.daemon.tick();
            if self.daemon.queue_len() == 0 {
                return ok;
            }
        }
        panic!("queue did not drain: {:?}", self.daemon.pending());
    }

    /// New studio, started.
    pub fn started(name: &str) -> Self {
        let mut harness = Self::new();
        harness.daemon.new_studio(name).expect("new studio");
        harness.daemon.start_studio().expect("start studio");
        assert!(harness.settle());
        assert!(harness.daemon.studio().is_started());
        harness
    }

    pub fn pid_of(&self, app: &str) -> u32 {
        let studio = self.daemon.studio();
        studio
            .supervisor()
            .apps()
            .chain(studio.rooms().flat_map(|r| r.supervisor().apps()))
            .find(|a| a.name() == app)
            .and_then(|a| a.pid())
            .expect("running app")
    }

    pub fn exit(&self, pid: u32) {
        self.apps.borrow_mut().exited.insert(pid);
    }

    pub fn push_event(&self, event: ServerEvent) {
        self.server.borrow_mut().events.push_back(event);
    }

    pub fn has_event(&self, wanted: &StudioEvent) -> bool {
        self.events.borrow().iter().any(|e| e == wanted)
    }

    pub fn has_note(&self, title: &str) -> bool {
        self.notes.borrow().iter().any(|(_, t)| t == title)
    }
}
