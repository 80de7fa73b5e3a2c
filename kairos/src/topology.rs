use std::{collections::BTreeMap, sync::Arc};

use kairos_backend::{
    DeviceConfig, DeviceId, DeviceProperties, Error, QueueTraits, RenderGraphInfo, Result, SurfaceConfig, SurfaceId,
};

#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub config: DeviceConfig,
    /// Set once the backend realized the device
    pub properties: Option<DeviceProperties>,
}

#[derive(Debug, Clone)]
pub struct SurfaceEntry {
    pub config: SurfaceConfig,
    pub realized: bool,
}

/// Devices, surfaces and render graphs known to the orchestrator.
///
/// Every structural change increments the generation. An execution graph that was built for an
/// older generation is outdated.
#[derive(Debug, Default, Clone)]
pub struct Topology {
    devices: BTreeMap<DeviceId, DeviceEntry>,
    surfaces: BTreeMap<SurfaceId, SurfaceEntry>,
    render_graphs: BTreeMap<String, Arc<RenderGraphInfo>>,
    /// Realized surfaces that were removed and still have to be cleaned up by the backend
    removed_surfaces: Vec<SurfaceId>,
    generation: u64,
}

impl Topology {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Marks the topology as changed without a structural change
    pub(crate) fn touch(&mut self) {
        self.generation += 1;
    }

    pub fn add_device(&mut self, device: DeviceId, config: DeviceConfig, properties: Option<DeviceProperties>) {
        self.devices.insert(device, DeviceEntry { config, properties });
        self.touch();
    }

    pub fn device(&self, device: DeviceId) -> Option<&DeviceEntry> {
        self.devices.get(&device)
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &DeviceEntry)> {
        self.devices.iter().map(|(id, entry)| (*id, entry))
    }

    pub(crate) fn devices_mut(&mut self) -> impl Iterator<Item = (DeviceId, &mut DeviceEntry)> {
        self.devices.iter_mut().map(|(id, entry)| (*id, entry))
    }

    /// Checks that the device and the render graph of the configuration are known
    pub fn validate_surface_config(&self, config: &SurfaceConfig) -> Result<()> {
        if !self.devices.contains_key(&config.device) {
            return Err(Error::UnknownDevice(config.device));
        }
        if let Some(render_graph) = &config.render_graph {
            if !self.render_graphs.contains_key(render_graph) {
                return Err(Error::UnknownRenderGraph(render_graph.clone()));
            }
        }
        Ok(())
    }

    pub fn add_surface(&mut self, surface: SurfaceId, config: SurfaceConfig, realized: bool) -> Result<()> {
        self.validate_surface_config(&config)?;
        self.surfaces.insert(surface, SurfaceEntry { config, realized });
        self.touch();
        Ok(())
    }

    /// Removes the surface. A realized surface is remembered until [`Topology::take_removed_surfaces`] is called.
    pub fn remove_surface(&mut self, surface: SurfaceId) -> Result<SurfaceEntry> {
        let entry = self.surfaces.remove(&surface).ok_or(Error::UnknownSurface(surface))?;
        if entry.realized {
            self.removed_surfaces.push(surface);
        }
        self.touch();
        Ok(entry)
    }

    pub fn take_removed_surfaces(&mut self) -> Vec<SurfaceId> {
        std::mem::take(&mut self.removed_surfaces)
    }

    pub fn surface(&self, surface: SurfaceId) -> Option<&SurfaceEntry> {
        self.surfaces.get(&surface)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = (SurfaceId, &SurfaceEntry)> {
        self.surfaces.iter().map(|(id, entry)| (*id, entry))
    }

    pub(crate) fn surfaces_mut(&mut self) -> impl Iterator<Item = (SurfaceId, &mut SurfaceEntry)> {
        self.surfaces.iter_mut().map(|(id, entry)| (*id, entry))
    }

    /// Surfaces ordered by submission priority and then by id
    pub fn surfaces_in_submission_order(&self) -> Vec<(SurfaceId, &SurfaceEntry)> {
        let mut surfaces = self.surfaces().collect::<Vec<_>>();
        surfaces.sort_by_key(|(id, entry)| (entry.config.submission_priority, *id));
        surfaces
    }

    /// Creates the info for compiling the render graph. A graph with a known name gets the next generation.
    pub fn prepare_render_graph(&self, name: &str, queues: Vec<QueueTraits>) -> RenderGraphInfo {
        let generation = self.render_graphs.get(name).map(|info| info.generation + 1).unwrap_or(0);
        RenderGraphInfo {
            name: name.to_owned(),
            queues,
            generation,
        }
    }

    pub fn insert_render_graph(&mut self, info: RenderGraphInfo) -> Arc<RenderGraphInfo> {
        let info = Arc::new(info);
        self.render_graphs.insert(info.name.clone(), info.clone());
        self.touch();
        info
    }

    pub fn render_graph(&self, name: &str) -> Option<&Arc<RenderGraphInfo>> {
        self.render_graphs.get(name)
    }

    pub fn render_graphs(&self) -> impl Iterator<Item = &Arc<RenderGraphInfo>> {
        self.render_graphs.values()
    }

    /// Assigns a compiled render graph to the surface. `None` renders with the default graph.
    pub fn set_surface_render_graph(&mut self, surface: SurfaceId, render_graph: Option<String>) -> Result<()> {
        if let Some(name) = &render_graph {
            if !self.render_graphs.contains_key(name) {
                return Err(Error::UnknownRenderGraph(name.clone()));
            }
        }
        let entry = self.surfaces.get_mut(&surface).ok_or(Error::UnknownSurface(surface))?;
        entry.config.render_graph = render_graph;
        self.touch();
        Ok(())
    }
}
