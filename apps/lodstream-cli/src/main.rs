use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use clap::{Parser, Subcommand, ValueEnum};
use glam::{Mat4, Vec2, Vec3};
use lodstream_commands::{
    CommandListener, CommandQueue, InstanceData, MaterialProperty, MeshData, PropertyKey,
    TextureData, VisibilityChange,
};
use lodstream_common::{BoundingVolume, IdAllocator, InstanceId, MeshId, NodeId, TextureId};
use lodstream_content::{
    ContentError, ContentLoader, LoadContext, LoadRequest, LoaderRegistry,
    StreamingContentManager,
};
use lodstream_hierarchy::{ContentDescriptor, Hierarchy, NodeData};
use lodstream_stream::{LoadExecution, Observer, SchedulerState, StreamConfig, Streamer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lodstream-cli", about = "CLI driver for hierarchical LOD streaming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Fly an observer over a synthetic quadtree and report streaming activity
    Simulate {
        /// Levels below the root
        #[arg(short, long, default_value = "5")]
        depth: u32,
        /// Number of ticks to run
        #[arg(short, long, default_value = "120")]
        ticks: u64,
        /// Observer speed in world units per second
        #[arg(short, long, default_value = "400")]
        speed: f32,
        #[command(flatten)]
        overrides: ConfigArgs,
    },
    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        overrides: ConfigArgs,
    },
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the concurrent load cap
    #[arg(long)]
    max_loads: Option<usize>,
    /// Override the collapse delay in seconds
    #[arg(long)]
    unload_delay: Option<f64>,
    /// Override where loads run
    #[arg(long, value_enum)]
    execution: Option<Execution>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Execution {
    Immediate,
    Deferred,
    ThreadPool,
}

impl From<Execution> for LoadExecution {
    fn from(value: Execution) -> Self {
        match value {
            Execution::Immediate => Self::Immediate,
            Execution::Deferred => Self::Deferred,
            Execution::ThreadPool => Self::ThreadPool,
        }
    }
}

impl ConfigArgs {
    fn resolve(&self) -> anyhow::Result<StreamConfig> {
        let mut config = match &self.config {
            Some(path) => StreamConfig::load(path)?,
            None => StreamConfig::default(),
        };
        if let Some(max) = self.max_loads {
            config.max_concurrent_loads = max;
        }
        if let Some(delay) = self.unload_delay {
            config.unload_delay = delay;
        }
        if let Some(execution) = self.execution {
            config.load_execution = execution.into();
        }
        config.validate()?;
        Ok(config)
    }
}

const WORLD_HALF_EXTENT: f32 = 4096.0;
const TICK_SECONDS: f64 = 1.0 / 60.0;

/// Posts a single-quad mesh and one instance per node.
#[derive(Default)]
struct SyntheticLoader {
    meshes: Mutex<HashMap<InstanceId, MeshId>>,
}

impl ContentLoader for SyntheticLoader {
    fn load(&self, req: &LoadRequest, ctx: &LoadContext) -> Result<InstanceId, ContentError> {
        if req.cancel.is_cancelled() {
            return Err(ContentError::Cancelled);
        }
        let mesh = ctx.ids.mesh();
        ctx.commands.allocate_mesh(MeshData {
            id: mesh,
            positions: vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
            ],
            normals: vec![Vec3::Y; 4],
            uvs: vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y],
            indices: vec![0, 1, 2, 0, 2, 3],
        });
        let instance = ctx.ids.instance();
        ctx.commands
            .allocate_instance(instance, req.node, mesh, req.transform);
        self.meshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance, mesh);
        Ok(instance)
    }

    fn unload(&self, instance: InstanceId, ctx: &LoadContext) {
        ctx.commands.dispose_instance(instance);
        let mesh = self
            .meshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&instance);
        if let Some(mesh) = mesh {
            ctx.commands.dispose_mesh(mesh);
        }
    }
}

/// Stands in for a renderer: tracks live resources and counts traffic.
#[derive(Default)]
struct CountingListener {
    meshes: usize,
    instances: HashMap<InstanceId, bool>,
    visibility_changes: usize,
    atomic_blocks: usize,
    commands: usize,
}

impl CountingListener {
    fn visible(&self) -> usize {
        self.instances.values().filter(|v| **v).count()
    }
}

impl CommandListener for CountingListener {
    fn allocate_texture(&mut self, _: TextureData) {}

    fn dispose_texture(&mut self, _: TextureId) {}

    fn allocate_mesh(&mut self, _: MeshData) {
        self.meshes += 1;
    }

    fn dispose_mesh(&mut self, _: MeshId) {
        self.meshes -= 1;
    }

    fn allocate_instance(&mut self, instance: InstanceData) {
        self.instances.insert(instance.id, instance.visible);
    }

    fn dispose_instance(&mut self, id: InstanceId) {
        self.instances.remove(&id);
    }

    fn update_instance_visibility(&mut self, change: VisibilityChange) {
        if let Some(visible) = self.instances.get_mut(&change.instance) {
            *visible = change.visible;
        }
        self.visibility_changes += 1;
    }

    fn add_material_property(&mut self, _: MaterialProperty) {}

    fn remove_material_property(&mut self, _: PropertyKey) {}

    fn begin_atomic(&mut self) {
        self.atomic_blocks += 1;
    }
}

/// Quadtree over a flat square; each level halves the geometric error.
fn build_quadtree(depth: u32) -> Hierarchy {
    fn build(h: &mut Hierarchy, parent: NodeId, center: Vec3, half: f32, level: u32, depth: u32) {
        if level > depth {
            return;
        }
        for (dx, dz) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
            let child_half = half * 0.5;
            let c = center + Vec3::new(dx, 0.0, dz) * child_half;
            let data = NodeData::new(
                BoundingVolume::aabb(
                    c - Vec3::new(child_half, 1.0, child_half),
                    c + Vec3::new(child_half, 1.0, child_half),
                ),
                WORLD_HALF_EXTENT / 8.0 / 2f32.powi(level as i32),
            )
            .with_transform(Mat4::from_translation(c) * Mat4::from_scale(Vec3::splat(child_half)));
            let uri = format!("synthetic://{level}/{:.0}/{:.0}", c.x, c.z);
            let node = h.add_node(parent, data, Some(ContentDescriptor::new("synthetic", uri)));
            build(h, node, c, child_half, level + 1, depth);
        }
    }
    let mut h = Hierarchy::new();
    build(&mut h, NodeId::ROOT, Vec3::ZERO, WORLD_HALF_EXTENT, 1, depth);
    h
}

fn observer_at(eye: Vec3) -> Observer {
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 1.0, 50_000.0);
    let view = Mat4::look_at_rh(eye, eye + Vec3::new(1.0, -0.3, 0.0), Vec3::Y);
    Observer::screen_space(proj * view, 1080.0, 2.0)
}

fn simulate(config: &StreamConfig, depth: u32, ticks: u64, speed: f32) {
    let _span = tracing::info_span!("simulate", depth, ticks).entered();

    let commands = Arc::new(CommandQueue::new());
    let mut registry = LoaderRegistry::new();
    registry.register("synthetic", Arc::new(SyntheticLoader::default()));
    let content = StreamingContentManager::with_execution(
        registry,
        config.load_execution,
        Arc::clone(&commands),
        IdAllocator::new(),
    );
    let hierarchy = build_quadtree(depth);
    println!(
        "Simulate: depth={depth}, nodes={}, ticks={ticks}, speed={speed}",
        hierarchy.node_count()
    );
    let mut streamer = Streamer::with_hierarchy(config, hierarchy, content);
    let mut scene = CountingListener::default();

    let mut total_loads = 0;
    let mut total_collapses = 0;
    for tick in 0..ticks {
        let time = tick as f64 * TICK_SECONDS;
        let x = -WORLD_HALF_EXTENT + speed * time as f32;
        let observers = [observer_at(Vec3::new(x, 150.0, 0.0))];
        let stats = streamer.tick(&observers, time);
        scene.commands += commands.execute_all(&mut scene);

        total_loads += stats.scheduler.loads_dispatched;
        total_collapses += stats.scheduler.collapses;
        let state = match stats.state {
            SchedulerState::Processing => "processing",
            SchedulerState::WaitingOnLoad => "waiting",
            SchedulerState::Done => "done",
        };
        println!(
            "tick {tick:>4}: x={x:>8.1} state={state:<10} expanded={:>4} loads={:>3} loading={:>3} visible={:>4}",
            stats.target.expanded,
            stats.scheduler.loads_dispatched,
            streamer.current().loading_count(),
            scene.visible(),
        );
    }

    println!(
        "Totals: loads={total_loads}, collapses={total_collapses}, commands={}, atomic_blocks={}, visibility_changes={}",
        scene.commands, scene.atomic_blocks, scene.visibility_changes
    );
    println!(
        "Resident: meshes={}, instances={}, visible={}",
        scene.meshes,
        scene.instances.len(),
        scene.visible()
    );
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("lodstream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", lodstream_common::crate_info());
            println!("hierarchy: {}", lodstream_hierarchy::crate_info());
            println!("commands: {}", lodstream_commands::crate_info());
            println!("content: {}", lodstream_content::crate_info());
            println!("stream: {}", lodstream_stream::crate_info());
        }
        Commands::Simulate {
            depth,
            ticks,
            speed,
            overrides,
        } => {
            let config = overrides.resolve()?;
            simulate(&config, depth, ticks, speed);
        }
        Commands::Config { overrides } => {
            let config = overrides.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
