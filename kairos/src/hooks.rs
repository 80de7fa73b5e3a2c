use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use kairos_backend::{Result, SurfaceId};
use kairos_shared::TerminationFlag;

use crate::frame_clock::SlotIndex;

/// Point of the frame at which a hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookPoint {
    RenderStart,
    RenderFinish,
}

/// Passed to every render hook
pub struct RenderContext<'a> {
    pub frame_number: u64,
    pub render_slot: SlotIndex,
    pub prev_update_slot: SlotIndex,
    pub render_time_delta: Duration,
    pub interpolation: f64,
    /// `None` for the global hooks
    pub surface: Option<SurfaceId>,
    termination: &'a TerminationFlag,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        frame_number: u64,
        render_slot: SlotIndex,
        prev_update_slot: SlotIndex,
        render_time_delta: Duration,
        interpolation: f64,
        surface: Option<SurfaceId>,
        termination: &'a TerminationFlag,
    ) -> Self {
        Self {
            frame_number,
            render_slot,
            prev_update_slot,
            render_time_delta,
            interpolation,
            surface,
            termination,
        }
    }

    /// Requests the orchestrator to stop
    pub fn set_terminate(&self) {
        self.termination.set();
    }

    pub fn is_terminating(&self) -> bool {
        self.termination.is_set()
    }
}

pub type RenderHook = Arc<dyn Fn(&RenderContext) -> Result<()> + Send + Sync>;

/// The registered render hooks.
///
/// Hooks of one point run in registration order. The first failing hook stops the remaining ones.
#[derive(Clone, Default)]
pub struct Hooks {
    global: BTreeMap<HookPoint, Vec<RenderHook>>,
    surfaces: BTreeMap<(SurfaceId, HookPoint), Vec<RenderHook>>,
}

impl Hooks {
    /// Replaces all global hooks of the point
    pub fn set_global(&mut self, point: HookPoint, hook: RenderHook) {
        self.global.insert(point, vec![hook]);
    }

    pub fn add_global(&mut self, point: HookPoint, hook: RenderHook) {
        self.global.entry(point).or_default().push(hook);
    }

    pub fn add_surface(&mut self, surface: SurfaceId, point: HookPoint, hook: RenderHook) {
        self.surfaces.entry((surface, point)).or_default().push(hook);
    }

    pub fn remove_surface(&mut self, surface: SurfaceId) {
        self.surfaces.retain(|(hook_surface, _), _| *hook_surface != surface);
    }

    pub fn run_global(&self, point: HookPoint, context: &RenderContext) -> Result<()> {
        run_all(self.global.get(&point), context)
    }

    pub fn run_surface(&self, surface: SurfaceId, point: HookPoint, context: &RenderContext) -> Result<()> {
        run_all(self.surfaces.get(&(surface, point)), context)
    }
}

fn run_all(hooks: Option<&Vec<RenderHook>>, context: &RenderContext) -> Result<()> {
    for hook in hooks.into_iter().flatten() {
        hook(context)?;
    }
    Ok(())
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let global = self.global.iter().map(|(point, hooks)| (point, hooks.len())).collect::<BTreeMap<_, _>>();
        let surfaces = self.surfaces.iter().map(|(key, hooks)| (key, hooks.len())).collect::<BTreeMap<_, _>>();
        f.debug_struct("Hooks")
            .field("global", &global)
            .field("surfaces", &surfaces)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use kairos_backend::Error;
    use kairos_shared::parking_lot::Mutex;

    use super::*;

    fn context(termination: &TerminationFlag, surface: Option<SurfaceId>) -> RenderContext<'_> {
        RenderContext::new(0, SlotIndex::ALL[0], SlotIndex::ALL[2], Duration::ZERO, 0.0, surface, termination)
    }

    fn recording_hook(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> RenderHook {
        let log = log.clone();
        Arc::new(move |_| {
            log.lock().push(name);
            Ok(())
        })
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::default();
        hooks.add_global(HookPoint::RenderStart, recording_hook(&log, "first"));
        hooks.add_global(HookPoint::RenderStart, recording_hook(&log, "second"));
        hooks.add_global(HookPoint::RenderFinish, recording_hook(&log, "finish"));

        let termination = TerminationFlag::new();
        hooks.run_global(HookPoint::RenderStart, &context(&termination, None)).unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn set_replaces_previous_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::default();
        hooks.add_global(HookPoint::RenderStart, recording_hook(&log, "old"));
        hooks.set_global(HookPoint::RenderStart, recording_hook(&log, "new"));

        let termination = TerminationFlag::new();
        hooks.run_global(HookPoint::RenderStart, &context(&termination, None)).unwrap();
        assert_eq!(*log.lock(), vec!["new"]);
    }

    #[test]
    fn failing_hook_stops_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::default();
        let surface = SurfaceId::from_raw(1);
        hooks.add_surface(
            surface,
            HookPoint::RenderFinish,
            Arc::new(|_| {
                Err(Error::StageFailed {
                    stage: "hook".to_owned(),
                    message: "broken".to_owned(),
                })
            }),
        );
        hooks.add_surface(surface, HookPoint::RenderFinish, recording_hook(&log, "after"));

        let termination = TerminationFlag::new();
        let result = hooks.run_surface(surface, HookPoint::RenderFinish, &context(&termination, Some(surface)));
        assert!(result.is_err());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn removed_surface_hooks_do_not_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::default();
        let surface = SurfaceId::from_raw(1);
        hooks.add_surface(surface, HookPoint::RenderStart, recording_hook(&log, "surface"));
        hooks.remove_surface(surface);

        let termination = TerminationFlag::new();
        hooks
            .run_surface(surface, HookPoint::RenderStart, &context(&termination, Some(surface)))
            .unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn hook_can_terminate() {
        let mut hooks = Hooks::default();
        hooks.set_global(
            HookPoint::RenderFinish,
            Arc::new(|context| {
                context.set_terminate();
                Ok(())
            }),
        );
        let termination = TerminationFlag::new();
        hooks.run_global(HookPoint::RenderFinish, &context(&termination, None)).unwrap();
        assert!(termination.is_set());
    }
}
