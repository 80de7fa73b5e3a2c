mod scene;

use std::{io, path::PathBuf, sync::Arc, thread, time::Duration};

use clap::{Parser, ValueEnum};
use color_eyre as ey;
use ey::eyre::{Context, ContextCompat};
use kairos::{FrameSlots, HookPoint, Orchestrator};
use kairos_backend::{
    headless::{HeadlessBackend, HeadlessConfig},
    DeviceConfig, QueueTraits, SurfaceConfig,
};
use kairos_shared::{
    debug_info,
    log::{self, info, trace},
    FrameRate, OrchestratorConfig, PacingPolicy, QueueSubmissionPolicy,
};

use crate::scene::Scene;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SubmissionPolicy {
    Independent,
    SharedQueueOrdered,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Pacing {
    FixedRate,
    CatchUp,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CommandLineArguments {
    /// YAML file with the orchestrator configuration
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Number of frames after which the viewer terminates
    #[arg(long, short, default_value_t = 600)]
    frames: u64,

    /// Number of surfaces that are rendered from the start
    #[arg(long, short, default_value_t = 2)]
    surfaces: usize,

    #[arg(long)]
    updates_per_second: Option<u32>,

    /// Limits the render loop. Unlimited when not set.
    #[arg(long)]
    frame_rate: Option<u32>,

    #[arg(long)]
    submission_policy: Option<SubmissionPolicy>,

    #[arg(long)]
    pacing: Option<Pacing>,

    /// Simulated time between drawing and presenting a frame in milliseconds
    #[arg(long, default_value_t = 2)]
    present_latency: u64,

    /// Log every stage of every frame
    #[arg(long, short)]
    verbose: bool,
}

impl CommandLineArguments {
    fn orchestrator_config(&self) -> ey::Result<OrchestratorConfig> {
        let mut config = match &self.config {
            Some(path) => OrchestratorConfig::from_yaml_file(path)
                .wrap_err_with(|| format!("Failed to read the configuration {}", path.display()))?,
            None => OrchestratorConfig::default(),
        };
        config.application_name.get_or_insert_with(|| "kairos_viewer".to_owned());
        if let Some(updates_per_second) = self.updates_per_second {
            config.updates_per_second = updates_per_second;
        }
        if let Some(frame_rate) = self.frame_rate {
            config.frame_rate = FrameRate::Limited(frame_rate);
        }
        if let Some(policy) = self.submission_policy {
            config.queue_submission_policy = match policy {
                SubmissionPolicy::Independent => QueueSubmissionPolicy::Independent,
                SubmissionPolicy::SharedQueueOrdered => QueueSubmissionPolicy::SharedQueueOrdered,
            };
        }
        if let Some(pacing) = self.pacing {
            config.pacing_policy = match pacing {
                Pacing::FixedRate => PacingPolicy::FixedRate,
                Pacing::CatchUp => PacingPolicy::CatchUp,
            };
        }
        Ok(config)
    }
}

fn main() -> ey::Result<()> {
    // Parse command line arguments
    let command_line_arguments = CommandLineArguments::parse();

    // Setup logging
    let level = if command_line_arguments.verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                kairos_shared::chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stdout())
        .apply()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    let config = command_line_arguments.orchestrator_config()?;
    info!("Configuration:\n{}", config.to_yaml_string()?);

    // Create Orchestrator
    let orchestrator = Orchestrator::<HeadlessBackend>::builder()
        .add_config(config)
        .add_backend_config(HeadlessConfig {
            present_latency: Some(Duration::from_millis(command_line_arguments.present_latency)),
            record_calls: false,
            ..Default::default()
        })
        .build()
        .wrap_err("Failed to create orchestrator")?;

    // Topology
    let device = orchestrator
        .add_device(DeviceConfig::new(0).with_debug_info(debug_info!("main_device")))
        .wrap_err("Failed to add device")?;
    orchestrator
        .compile_render_graph("forward", vec![QueueTraits::graphics(), QueueTraits::compute()])
        .wrap_err("Failed to compile render graph")?;
    for index in 0..command_line_arguments.surfaces {
        let surface = orchestrator
            .add_surface(
                SurfaceConfig::new(device)
                    .with_render_graph("forward")
                    .with_submission_priority(index as i32)
                    .with_debug_info(debug_info!(format!("surface_{index}"))),
            )
            .wrap_err_with(|| format!("Failed to add surface {index}"))?;
        orchestrator.add_surface_hook(surface, HookPoint::RenderStart, move |context| {
            trace!("Rendering {surface} with interpolation {:.2}", context.interpolation);
            Ok(())
        })?;
    }

    // Scene state shared by the update and the render activity
    let scene = Arc::new(FrameSlots::new(Scene::default()));
    let update_scene = scene.clone();
    orchestrator.add_update_task("scene", move |context| {
        let next = update_scene.read(context.source_slot).advance(context.tick, context.update_period);
        *update_scene.write(context.update_slot) = next;
        Ok(())
    });

    let render_scene = scene.clone();
    orchestrator.set_event_render_start(move |context| {
        let previous = *render_scene.read(context.prev_update_slot);
        let next = *render_scene.read(context.render_slot);
        let scene = Scene::interpolate(&previous, &next, context.interpolation);
        trace!(
            "Frame {}: tick {} camera at {:?}",
            context.frame_number,
            scene.tick,
            scene.camera_position()
        );
        Ok(())
    });

    let frames = command_line_arguments.frames;
    orchestrator.set_event_render_finish(move |context| {
        if context.frame_number + 1 >= frames {
            context.set_terminate();
        }
        Ok(())
    });

    orchestrator.realize().wrap_err("Failed to realize orchestrator")?;

    thread::scope(|scope| -> ey::Result<()> {
        // Changes the topology while the render loop is running
        let topology_thread = thread::Builder::new()
            .name("topology-thread".to_owned())
            .spawn_scoped(scope, || -> ey::Result<()> {
                let termination = orchestrator.termination_flag();
                let wait_for_frame = |frame_number: u64| {
                    while orchestrator.frame_number() < frame_number {
                        if termination.wait_timeout(Duration::from_millis(10)) {
                            return false;
                        }
                    }
                    true
                };

                if !wait_for_frame(frames / 3) {
                    return Ok(());
                }
                let surface = orchestrator
                    .add_surface(SurfaceConfig::new(device).with_debug_info(debug_info!("late_surface")))
                    .wrap_err("Failed to add late surface")?;
                info!("Added {surface} at frame {}", orchestrator.frame_number());

                if !wait_for_frame(2 * frames / 3) {
                    return Ok(());
                }
                orchestrator.remove_surface(surface).wrap_err("Failed to remove late surface")?;
                info!("Removed {surface} at frame {}", orchestrator.frame_number());
                Ok(())
            })
            .wrap_err("Failed to spawn topology thread")?;

        let run_result = orchestrator.run().wrap_err("Orchestrator failed");
        let topology_result = topology_thread
            .join()
            .ok()
            .wrap_err("Topology thread panicked")?;
        run_result.and(topology_result)
    })?;

    if let Some(error) = orchestrator.take_update_error() {
        log::error!("Last update error: {error}");
    }
    let statistics = orchestrator.statistics();
    info!(
        "Rendered {} frames, {} failed, {} cancelled, {} update ticks skipped",
        orchestrator.frame_number(),
        statistics.failed_frames,
        statistics.cancelled_frames,
        statistics.skipped_ticks
    );
    if let (Some(update), Some(render)) = (statistics.update.average(), statistics.render.average()) {
        info!("Average update time {update:?}, average render time {render:?}");
    }

    orchestrator.cleanup().wrap_err("Failed to clean up orchestrator")?;
    Ok(())
}
