//! Camera session lifecycle.
//!
//! `CameraSessionManager` owns the only active stream. Starting a new session always
//! stops the previous one first, so two sessions never hold hardware at the same time.

use super::camera::{CameraBackend, CameraDevice, CaptureSettings, Facing, FrameSource, Selector};
use super::Frame;
use crate::module::error::ViewerError;
use crate::module::util::conf;

/// How `switch_camera` picks the next camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPolicy {
    CycleDeviceId, // next device in the enumerated list, wrapping around
    ToggleFacing,  // user <-> environment
}

impl SwitchPolicy {
    /// Convert a config string to a policy. Unknown values fall back to device cycling.
    pub fn from_string(s: &str) -> SwitchPolicy {
        match s {
            "cycle_device" => SwitchPolicy::CycleDeviceId,
            "toggle_facing" => SwitchPolicy::ToggleFacing,
            other => {
                log::warn!("Unknown switch policy {:?}, cycling devices", other);
                SwitchPolicy::CycleDeviceId
            }
        }
    }
}

/// The currently active stream.
pub struct CameraSession {
    pub device: CameraDevice,
    source: Option<Box<dyn FrameSource>>, // None while lent to a grab
    generation: u64,
}

enum SessionState {
    Idle,
    Requesting,
    Active(CameraSession),
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CameraStatus {
    #[default]
    Idle,
    Requesting,
    Active(CameraDevice),
}

/// Owns camera enumeration, acquisition, switching and release.
///
pub struct CameraSessionManager {
    backend: Box<dyn CameraBackend>,
    settings: CaptureSettings,
    policy: SwitchPolicy,
    preferred_device: Option<String>,
    preferred_facing: Facing,
    devices: Option<Vec<CameraDevice>>, // None until enumerated
    requested: Option<Selector>,        // last selector passed to start
    state: SessionState,
    generation: u64, // bumped on every started session
}

impl CameraSessionManager {
    pub fn new(backend: Box<dyn CameraBackend>, settings: CaptureSettings, policy: SwitchPolicy) -> Self {
        Self {
            backend,
            settings,
            policy,
            preferred_device: None,
            preferred_facing: Facing::User,
            devices: None,
            requested: None,
            state: SessionState::Idle,
            generation: 0,
        }
    }

    /// Manager configured from the `[camera]` section.
    pub fn from_conf(backend: Box<dyn CameraBackend>, conf: &conf::Camera) -> Self {
        let mut manager = Self::new(
            backend,
            CaptureSettings::from_conf(conf),
            SwitchPolicy::from_string(&conf.switch_policy),
        );
        if !conf.device.is_empty() {
            manager.preferred_device = Some(conf.device.clone());
        }
        if let Facing::Environment = Facing::from_string(&conf.facing) {
            manager.preferred_facing = Facing::Environment;
        }
        manager
    }

    pub fn policy(&self) -> SwitchPolicy {
        self.policy
    }

    /// Query the available video input devices and refresh the cached list.
    pub fn enumerate_devices(&mut self) -> Result<Vec<CameraDevice>, ViewerError> {
        let devices = self.backend.enumerate()?;
        log::info!("{} camera(s) found", devices.len());
        self.devices = Some(devices.clone());
        Ok(devices)
    }

    /// Cached device list, enumerating on first use.
    pub fn devices(&mut self) -> Result<&[CameraDevice], ViewerError> {
        if self.devices.is_none() {
            self.enumerate_devices()?;
        }
        Ok(self.devices.as_deref().unwrap_or(&[]))
    }

    /// Selector used when the user starts without choosing a camera.
    ///
    /// Device cycling opens the configured device, or the first enumerated one.
    /// Returns `None` when no camera is present.
    pub fn default_selector(&mut self) -> Option<Selector> {
        match self.policy {
            SwitchPolicy::ToggleFacing => Some(Selector::Facing(self.preferred_facing)),
            SwitchPolicy::CycleDeviceId => {
                if let Some(id) = &self.preferred_device {
                    return Some(Selector::DeviceId(id.clone()));
                }
                match self.devices() {
                    Ok(devices) => devices.first().map(|d| Selector::DeviceId(d.id.clone())),
                    Err(e) => {
                        log::warn!("Camera enumeration failed: {}", e);
                        None
                    }
                }
            }
        }
    }

    /// Acquire a stream matching the selector, replacing the current session.
    ///
    /// The previous session is released before the new device is opened. On failure the
    /// manager is left idle and may be started again.
    pub fn start(&mut self, selector: Selector) -> Result<CameraDevice, ViewerError> {
        self.stop();
        self.state = SessionState::Requesting;
        self.requested = Some(selector.clone());
        log::debug!("Requesting camera {:?}", selector);

        let opened = self
            .resolve(&selector)
            .and_then(|device| Ok((self.backend.open(&device, &self.settings)?, device)));
        match opened {
            Ok((source, device)) => {
                log::info!("Camera session started on {} ({})", device.id, device.label);
                self.generation += 1;
                self.state = SessionState::Active(CameraSession {
                    device: device.clone(),
                    source: Some(source),
                    generation: self.generation,
                });
                Ok(device)
            }
            Err(e) => {
                self.state = SessionState::Idle;
                log::warn!("Camera acquisition failed: {}", e);
                Err(e)
            }
        }
    }

    /// Move to the next camera according to the switch policy.
    pub fn switch_camera(&mut self) -> Result<CameraDevice, ViewerError> {
        let selector = match self.policy {
            SwitchPolicy::CycleDeviceId => {
                let current = self.current_device_id();
                let devices = self.devices()?;
                if devices.is_empty() {
                    return Err(ViewerError::DeviceUnavailable("no camera to switch to".into()));
                }
                let next = current
                    .and_then(|id| devices.iter().position(|d| d.id == id))
                    .map_or(0, |i| (i + 1) % devices.len());
                Selector::DeviceId(devices[next].id.clone())
            }
            SwitchPolicy::ToggleFacing => Selector::Facing(self.current_facing().toggled()),
        };
        log::info!("Switching camera to {:?}", selector);
        self.start(selector)
    }

    /// Release the current session. Safe to call when nothing is active.
    pub fn stop(&mut self) {
        if let SessionState::Active(mut session) =
            std::mem::replace(&mut self.state, SessionState::Idle)
        {
            match session.source.as_mut() {
                Some(source) => source.stop(),
                None => log::warn!(
                    "Camera {} is busy grabbing, it is released when the grab returns",
                    session.device.id
                ),
            }
            log::info!("Camera session on {} stopped", session.device.id);
        }
    }

    /// Grab the current frame of the active session, `Ok(None)` when there is none.
    ///
    /// The source is lent to a blocking worker for the grab and handed back afterwards. If
    /// the session was stopped or replaced meanwhile, the returned source is stopped instead.
    pub async fn grab(&mut self) -> Result<Option<Frame>, ViewerError> {
        let (mut source, generation) = match &mut self.state {
            SessionState::Active(session) => match session.source.take() {
                Some(source) => (source, session.generation),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let (mut source, grabbed) = tokio::task::spawn_blocking(move || {
            let grabbed = source.grab();
            (source, grabbed)
        })
        .await
        .map_err(|e| ViewerError::Capture(format!("grab worker failed: {}", e)))?;

        match &mut self.state {
            SessionState::Active(session) if session.generation == generation => {
                session.source = Some(source);
            }
            _ => source.stop(),
        }
        grabbed
    }

    pub fn status(&self) -> CameraStatus {
        match &self.state {
            SessionState::Idle => CameraStatus::Idle,
            SessionState::Requesting => CameraStatus::Requesting,
            SessionState::Active(session) => CameraStatus::Active(session.device.clone()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active(_))
    }

    /// Pick the device a selector refers to.
    ///
    /// A facing selector prefers a device with that facing and otherwise takes the first
    /// camera, like a non-exact facing constraint would.
    fn resolve(&mut self, selector: &Selector) -> Result<CameraDevice, ViewerError> {
        let devices = self.devices()?;
        let found = match selector {
            Selector::DeviceId(id) => devices.iter().find(|d| &d.id == id),
            Selector::Facing(facing) => devices
                .iter()
                .find(|d| d.facing == *facing)
                .or_else(|| devices.first()),
        };
        found
            .cloned()
            .ok_or_else(|| ViewerError::DeviceUnavailable(format!("no camera matches {selector:?}")))
    }

    fn current_device_id(&self) -> Option<String> {
        match (&self.state, &self.requested) {
            (SessionState::Active(session), _) => Some(session.device.id.clone()),
            (_, Some(Selector::DeviceId(id))) => Some(id.clone()),
            _ => None,
        }
    }

    fn current_facing(&self) -> Facing {
        match (&self.requested, &self.state) {
            (Some(Selector::Facing(facing)), _) => *facing,
            (_, SessionState::Active(session)) => session.device.facing,
            _ => self.preferred_facing,
        }
    }
}

impl Drop for CameraSessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::super::camera::fake::{device, FakeBackend};
    use super::*;

    fn settings() -> CaptureSettings {
        CaptureSettings::from_conf(&conf::Config::default().camera)
    }

    fn manager(backend: FakeBackend, policy: SwitchPolicy) -> CameraSessionManager {
        CameraSessionManager::new(Box::new(backend), settings(), policy)
    }

    #[tokio::test]
    async fn start_and_stop_test() {
        let backend = FakeBackend::with_count(2);
        let log = backend.log.clone();
        let mut cams = manager(backend, SwitchPolicy::CycleDeviceId);
        assert_eq!(cams.status(), CameraStatus::Idle);

        let id = cams.start(Selector::DeviceId("cam1".into())).unwrap().id;
        assert_eq!(id, "cam1");
        assert!(cams.is_active());
        assert!(cams.grab().await.unwrap().is_some());

        cams.stop();
        cams.stop(); // idempotent
        assert_eq!(cams.status(), CameraStatus::Idle);
        assert!(cams.grab().await.unwrap().is_none());
        let log = log.lock().unwrap();
        assert_eq!(log.stopped, vec!["cam1".to_string()]);
        assert_eq!(log.live, 0);
    }

    #[test]
    fn never_two_sessions_test() {
        let backend = FakeBackend::with_count(3);
        let log = backend.log.clone();
        let mut cams = manager(backend, SwitchPolicy::CycleDeviceId);
        cams.start(Selector::DeviceId("cam0".into())).unwrap();
        cams.start(Selector::DeviceId("cam2".into())).unwrap();
        for _ in 0..5 {
            cams.switch_camera().unwrap();
        }
        let log = log.lock().unwrap();
        assert_eq!(log.max_live, 1);
        assert_eq!(log.live, 1);
        assert_eq!(log.opened.len(), 7);
        assert_eq!(log.stopped.len(), 6);
    }

    #[test]
    fn cycle_visits_all_devices_test() {
        for n in 1..=4 {
            let backend = FakeBackend::with_count(n);
            let mut cams = manager(backend, SwitchPolicy::CycleDeviceId);
            let first = cams.default_selector().unwrap();
            let mut seen = vec![cams.start(first).unwrap().id];
            for _ in 0..n {
                seen.push(cams.switch_camera().unwrap().id);
            }
            // n distinct devices, then back to the first one
            let mut distinct = seen[..n].to_vec();
            distinct.sort();
            distinct.dedup();
            assert_eq!(distinct.len(), n);
            assert_eq!(seen[n], seen[0]);
        }
    }

    #[test]
    fn switch_from_idle_test() {
        let mut cams = manager(FakeBackend::with_count(2), SwitchPolicy::CycleDeviceId);
        // Nothing requested yet: starts at the head of the list.
        assert_eq!(cams.switch_camera().unwrap().id, "cam0");
        assert_eq!(cams.switch_camera().unwrap().id, "cam1");
    }

    #[test]
    fn toggle_facing_test() {
        let backend = FakeBackend::new(vec![
            device("front", Facing::User),
            device("back", Facing::Environment),
        ]);
        let mut cams = manager(backend, SwitchPolicy::ToggleFacing);
        let first = cams.default_selector().unwrap();
        assert_eq!(first, Selector::Facing(Facing::User));
        assert_eq!(cams.start(first).unwrap().id, "front");
        assert_eq!(cams.switch_camera().unwrap().id, "back");
        assert_eq!(cams.switch_camera().unwrap().id, "front");
    }

    #[test]
    fn facing_fallback_test() {
        let mut cams = manager(FakeBackend::with_count(1), SwitchPolicy::ToggleFacing);
        // No camera reports a facing: the only camera is used either way.
        assert_eq!(cams.start(Selector::Facing(Facing::User)).unwrap().id, "cam0");
        assert_eq!(cams.switch_camera().unwrap().id, "cam0");
    }

    #[test]
    fn empty_devices_test() {
        let backend = FakeBackend::with_count(0);
        let log = backend.log.clone();
        let mut cams = manager(backend, SwitchPolicy::CycleDeviceId);
        assert!(cams.enumerate_devices().unwrap().is_empty());
        assert_eq!(cams.default_selector(), None);
        let res = cams.start(Selector::DeviceId("cam0".into()));
        assert!(matches!(res, Err(ViewerError::DeviceUnavailable(_))));
        assert_eq!(cams.status(), CameraStatus::Idle);
        assert!(matches!(
            cams.switch_camera(),
            Err(ViewerError::DeviceUnavailable(_))
        ));
        assert!(log.lock().unwrap().opened.is_empty());
    }

    #[test]
    fn permission_denied_test() {
        let mut backend = FakeBackend::with_count(1);
        backend.deny = true;
        let mut cams = manager(backend, SwitchPolicy::CycleDeviceId);
        let res = cams.start(Selector::DeviceId("cam0".into()));
        assert!(matches!(res, Err(ViewerError::PermissionDenied(_))));
        assert_eq!(cams.status(), CameraStatus::Idle);
    }

    #[test]
    fn failed_start_releases_previous_test() {
        let backend = FakeBackend::with_count(1);
        let log = backend.log.clone();
        let mut cams = manager(backend, SwitchPolicy::CycleDeviceId);
        cams.start(Selector::DeviceId("cam0".into())).unwrap();
        assert!(cams.start(Selector::DeviceId("missing".into())).is_err());
        assert_eq!(cams.status(), CameraStatus::Idle);
        assert_eq!(log.lock().unwrap().live, 0);
    }

    #[test]
    fn from_conf_test() {
        let mut conf = conf::Config::default().camera;
        conf.switch_policy = "toggle_facing".to_string();
        conf.facing = "environment".to_string();
        let mut cams = CameraSessionManager::from_conf(Box::new(FakeBackend::with_count(1)), &conf);
        assert_eq!(cams.policy(), SwitchPolicy::ToggleFacing);
        assert_eq!(
            cams.default_selector(),
            Some(Selector::Facing(Facing::Environment))
        );

        let mut conf = conf::Config::default().camera;
        conf.device = "cam0".to_string();
        let mut cams = CameraSessionManager::from_conf(Box::new(FakeBackend::with_count(2)), &conf);
        assert_eq!(cams.default_selector(), Some(Selector::DeviceId("cam0".into())));
        assert_eq!(SwitchPolicy::from_string("bogus"), SwitchPolicy::CycleDeviceId);
    }
}
