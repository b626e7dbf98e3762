//! The renderer: owns every pass and GPU resource and sequences the frame.

use std::path::Path;

use glam::{Mat4, Vec2, Vec3};
use radiance::{
    types::{ImageData, ImageDecoder, Light, LightType, MeshData, MeshLoader, RenderSettings},
    util::mipmap::MipmapGenerator,
    CommandQueue, DeviceContext, Descriptors, FrameClock, FrameRing, InputEvent, InstanceAdapterDevice, KeyState,
    Keys, PipelineRegistry, RendererConfig, ResourceState, ResourceStateTracker, RetainedResource, ShaderConfig,
    Texture, Transition,
};
use wgpu::{CommandEncoder, Surface, TextureFormat, TextureUsages};

use crate::{
    common::{
        universal_layouts, Camera, FrameInterface, LightConstants, PassConstants, PassNewArgs, RecordContext,
        Samplers, UniversalBindings, CASCADE_COUNT,
    },
    gbuffer::{GBuffer, GBufferPass},
    ibl::{procedural_sky, IblMaps, IblPass, IblSizes, CUBE_FORMAT},
    lighting::{LightingPass, LightingSources},
    plan::{plan_frame, FramePlan, PassKind, VoxelHistory},
    post::{PostPass, PostTargets},
    scene::{Scene, SceneUploadContext},
    shaders,
    shadow::{Cascades, CascadedShadowMap, ShadowPass},
    skybox::SkyboxPass,
    ssao::{map_size, ssao_constants, AmbientMaps, SsaoPass},
    taa::{jittered_projection, TaaPass, TaaTargets, TemporalFrame, TemporalState},
    uniforms::FrameResources,
    vxgi::{VoxelBounds, VoxelGrid, VxgiPass},
    RenderError, SetupError,
};

/// Units per second the camera moves with a movement key held.
const CAMERA_SPEED: f32 = 10.0;
const CAMERA_SPRINT: f32 = 5.0;
/// Camera rotation per pixel of mouse drag.
const DEGREES_PER_PIXEL: f32 = 0.1;
const CAMERA_START: Vec3 = Vec3::new(-2.29, 5.11, 1.15);
const CAMERA_FOV_Y: f32 = 0.25 * std::f32::consts::PI;
const CAMERA_NEAR: f32 = 1.0;
const CAMERA_FAR: f32 = 1000.0;

pub struct RendererNewArgs {
    pub iad: InstanceAdapterDevice,
    /// Window surface to present into. Frames stay in the internal back buffers without one.
    pub surface: Option<Surface<'static>>,
    pub config: RendererConfig,
    pub settings: RenderSettings,
    pub width: u32,
    pub height: u32,
    pub ibl_sizes: IblSizes,
}

struct Passes {
    shadow: ShadowPass,
    gbuffer: GBufferPass,
    ssao: SsaoPass,
    lighting: LightingPass,
    skybox: SkyboxPass,
    vxgi: VxgiPass,
    taa: TaaPass,
    post: PostPass,
    ibl: IblPass,
}

/// Render targets and volumes the passes communicate through.
struct Targets {
    shadow_map: CascadedShadowMap,
    gbuffer: GBuffer,
    ambient: AmbientMaps,
    voxels: VoxelGrid,
    ibl: IblMaps,
    taa: TaaTargets,
    post: PostTargets,
}

pub struct Renderer {
    context: DeviceContext,
    queue: CommandQueue,
    descriptors: Descriptors,
    registry: PipelineRegistry,
    state: ResourceStateTracker,
    frames: FrameRing<FrameResources>,
    samplers: Samplers,
    mipmaps: MipmapGenerator,
    passes: Passes,
    targets: Targets,

    config: RendererConfig,
    settings: RenderSettings,
    camera: Camera,
    keys: KeyState,
    lights: Vec<Light>,
    scene: Scene,

    temporal: TemporalState,
    voxel_history: VoxelHistory,
    voxel_bounds: VoxelBounds,
    /// Unjittered view projection of the previous frame.
    prev_view_proj: Option<Mat4>,
    frame_count: u64,
}

impl Renderer {
    pub fn new(args: RendererNewArgs) -> Result<Self, SetupError> {
        profiling::scope!("Renderer::new");

        let RendererNewArgs {
            iad,
            surface,
            config,
            settings,
            width,
            height,
            ibl_sizes,
        } = args;
        config.validate()?;

        let device = std::sync::Arc::clone(&iad.device);
        let features = iad.features;
        let queue = CommandQueue::new(std::sync::Arc::clone(&iad.device), std::sync::Arc::clone(&iad.queue));
        let mut descriptors = Descriptors::new(
            &device,
            config.rtv_heap_capacity,
            config.dsv_heap_capacity,
            config.srv_heap_capacity,
        );

        let spp = shaders::preprocessor();
        let shader_config = ShaderConfig {
            bindless_capacity: config.srv_heap_capacity,
            voxel_dimension: config.voxel_dimension,
            cascade_count: CASCADE_COUNT as u32,
        };

        let context = DeviceContext::new(
            iad,
            surface,
            &mut descriptors,
            &spp,
            config.frames_in_flight,
            width,
            height,
            settings.display.vsync,
        )?;

        let interface = FrameInterface::new(&device);
        let samplers = Samplers::new(&device);
        let registry = PipelineRegistry::new(&device, universal_layouts(&interface, &descriptors, &samplers));
        let mipmaps = MipmapGenerator::new(
            &device,
            &spp,
            &shader_config,
            &[CUBE_FORMAT, TextureFormat::Rgba8Unorm],
        )?;

        let pass_args = PassNewArgs {
            device: &device,
            spp: &spp,
            shader_config: &shader_config,
            registry: &registry,
            features,
        };
        let passes = Passes {
            shadow: ShadowPass::new(&pass_args)?,
            gbuffer: GBufferPass::new(&pass_args)?,
            ssao: SsaoPass::new(&pass_args)?,
            lighting: LightingPass::new(&pass_args)?,
            skybox: SkyboxPass::new(&pass_args)?,
            vxgi: VxgiPass::new(&pass_args)?,
            taa: TaaPass::new(&pass_args)?,
            post: PostPass::new(&pass_args)?,
            ibl: IblPass::new(&pass_args)?,
        };
        log::info!("Built {} pipelines", registry.names().len());

        let targets = Targets {
            shadow_map: CascadedShadowMap::new(&device, &mut descriptors, config.shadow_map_size)?,
            gbuffer: GBuffer::new(&device, &mut descriptors, width, height)?,
            ambient: AmbientMaps::new(&device, &mut descriptors, width, height)?,
            voxels: VoxelGrid::new(&device, &mut descriptors, &passes.vxgi, config.voxel_dimension)?,
            ibl: IblMaps::new(&device, &mut descriptors, ibl_sizes)?,
            taa: TaaTargets::new(&device, &mut descriptors, width, height)?,
            post: PostTargets::new(&device, &mut descriptors, width, height)?,
        };

        let mut state = ResourceStateTracker::new();
        for index in 0..context.back_buffer_count() {
            state.register(context.back_buffer(index).texture.label(), ResourceState::PRESENT);
        }
        state.register(context.depth().texture.label(), ResourceState::DEPTH_WRITE);
        state.register(targets.shadow_map.texture().label(), ResourceState::SHADER_RESOURCE);
        targets.gbuffer.register_states(&mut state);
        targets.ambient.register_states(&mut state);
        targets.voxels.register_states(&mut state);
        targets.ibl.register_states(&mut state);
        targets.taa.register_states(&mut state);
        targets.post.register_states(&mut state);

        let frames = FrameRing::new(
            (0..config.frames_in_flight as usize)
                .map(|slot| FrameResources::new(&device, &interface, &config, slot))
                .collect(),
        );

        let mut camera = Camera::new();
        camera.set_lens(CAMERA_FOV_Y, context.aspect_ratio(), CAMERA_NEAR, CAMERA_FAR);
        camera.set_position(CAMERA_START);
        camera.update_view_matrix();

        let lights = vec![Light::sun(&settings.sun)];
        let scene = Scene::new(config.frames_in_flight, config.object_capacity, config.material_capacity);
        let voxel_bounds = VoxelBounds::fit(&scene.bounds());

        let mut renderer = Self {
            context,
            queue,
            descriptors,
            registry,
            state,
            frames,
            samplers,
            mipmaps,
            passes,
            targets,
            config,
            settings,
            camera,
            keys: KeyState::new(),
            lights,
            scene,
            temporal: TemporalState::new(),
            voxel_history: VoxelHistory::default(),
            voxel_bounds,
            prev_view_proj: None,
            frame_count: 0,
        };

        renderer.set_environment(&procedural_sky(512, 256))?;
        Ok(renderer)
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Settings take effect from the next frame on.
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn state(&self) -> &ResourceStateTracker {
        &self.state
    }

    /// Resource transitions of the latest frame, plus any recorded by loading since, in recording order.
    pub fn take_transitions(&mut self) -> Vec<Transition> {
        self.state.take_transitions()
    }

    /// Every texture that follows the window size: g-buffer, ambient maps, TAA targets and post scratch.
    pub fn screen_textures(&self) -> impl Iterator<Item = &Texture> {
        let targets = &self.targets;
        targets
            .gbuffer
            .textures()
            .chain(targets.ambient.textures())
            .chain(targets.taa.textures())
            .chain(targets.post.textures())
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Index of the ring slot, and back buffer, of the most recent frame.
    pub fn current_frame_index(&self) -> usize {
        self.frames.current_index()
    }

    pub fn frame_ring(&self) -> &FrameRing<FrameResources> {
        &self.frames
    }

    /// Adds a light after the sun. Returns its index.
    pub fn add_light(&mut self, light: Light) -> Result<usize, SetupError> {
        if self.lights.len() as u32 >= self.config.light_capacity {
            return Err(SetupError::CapacityExceeded {
                what: "lights",
                capacity: self.config.light_capacity,
            });
        }
        self.lights.push(light);
        Ok(self.lights.len() - 1)
    }

    /// Loads a mesh through `loader` and places one instance of it at `world`.
    pub fn load_mesh(
        &mut self,
        loader: &dyn MeshLoader,
        decoder: &dyn ImageDecoder,
        path: &Path,
        world: Mat4,
    ) -> Result<usize, SetupError> {
        profiling::scope!("Renderer::load_mesh");

        let data = loader.load_mesh(path)?;
        let label = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        self.add_mesh(&label, &data, world, decoder)
    }

    /// Uploads `data` and places one instance of it at `world`. Returns the render item index.
    pub fn add_mesh(
        &mut self,
        label: &str,
        data: &MeshData,
        world: Mat4,
        decoder: &dyn ImageDecoder,
    ) -> Result<usize, SetupError> {
        profiling::scope!("Renderer::add_mesh");

        let mut list = self.queue.get_free_command_list();
        let added = self.scene.add_mesh(
            SceneUploadContext {
                device: &self.context.iad.device,
                queue: &self.context.iad.queue,
                encoder: list.encoder(),
                descriptors: &mut self.descriptors,
                mipmaps: &self.mipmaps,
            },
            label,
            data,
            world,
            decoder,
        );
        self.queue.execute_command_list(list);
        let index = added?;

        self.voxel_bounds = VoxelBounds::fit(&self.scene.bounds());
        self.voxel_history = VoxelHistory::default();
        Ok(index)
    }

    /// Replaces the environment with an equirectangular image and rebakes image based lighting.
    pub fn set_environment(&mut self, image: &ImageData) -> Result<(), SetupError> {
        profiling::scope!("Renderer::set_environment");

        let device = &self.context.iad.device;
        let queue = &self.context.iad.queue;
        let equirect = Texture::from_image(
            device,
            queue,
            "environment equirect",
            image,
            TextureUsages::TEXTURE_BINDING,
            false,
        );

        let mut list = self.queue.get_free_command_list();
        let baked = {
            let mut ctx = RecordContext {
                device,
                queue,
                encoder: list.encoder(),
                descriptors: &mut self.descriptors,
                registry: &self.registry,
                bindings: UniversalBindings {
                    frame: self.frames.resources().bind_group(),
                    samplers: self.samplers.bind_group(),
                },
                state: &mut self.state,
            };
            self.passes
                .ibl
                .bake(&mut ctx, &self.mipmaps, &equirect, &self.targets.ibl)
        };
        list.retain(RetainedResource::Texture(equirect.into_raw()));
        self.queue.execute_command_list(list);
        self.queue.flush();
        baked?;
        Ok(())
    }

    pub fn handle_event(&mut self, event: InputEvent) {
        match event {
            InputEvent::Resize { width, height } => self.resize(width, height),
            InputEvent::MouseDrag { dx, dy } => {
                self.camera.pitch((DEGREES_PER_PIXEL * dy).to_radians());
                self.camera.rotate_y((DEGREES_PER_PIXEL * dx).to_radians());
            }
            InputEvent::Key { key, pressed } => self.keys.apply(key, pressed),
        }
    }

    /// Recreates every screen sized resource. Waits for the GPU to go idle first.
    pub fn resize(&mut self, width: u32, height: u32) {
        profiling::scope!("Renderer::resize");

        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return;
        }
        if width == self.context.width() && height == self.context.height() {
            return;
        }

        self.queue.flush();
        self.frames.wait_all(&self.queue);

        let device = std::sync::Arc::clone(&self.context.iad.device);
        let descriptors = &mut self.descriptors;
        self.context.resize(descriptors, width, height);
        self.targets.gbuffer.resize(&device, descriptors, width, height);
        self.targets.ambient.resize(&device, descriptors, width, height);
        self.targets.taa.resize(&device, descriptors, width, height);
        self.targets.post.resize(&device, descriptors, width, height);

        self.camera
            .set_lens(CAMERA_FOV_Y, self.context.aspect_ratio(), CAMERA_NEAR, CAMERA_FAR);
        self.temporal.reset();
        self.prev_view_proj = None;
    }

    /// Records, submits and presents one frame.
    pub fn render_frame(&mut self, clock: &dyn FrameClock) -> Result<(), RenderError> {
        profiling::scope!("Renderer::render_frame");

        let delta = clock.delta_time();
        let total = clock.total_time();
        self.context.set_vsync(self.settings.display.vsync);
        self.update_camera(delta);
        self.update_lights(delta, total);

        let temporal = self
            .temporal
            .begin_frame(&self.settings, self.context.width(), self.context.height());
        let plan = plan_frame(&self.settings, self.voxel_history);
        let mut history = self.voxel_history;
        history.apply(&plan);
        let use_bounce = history.use_bounce(&self.settings);

        let slot = self.frames.begin_frame(&self.queue);
        let mut list = self.queue.get_free_command_list();
        let recorded = self
            .upload_constants(&temporal, delta, total)
            .and_then(|()| self.record(list.encoder(), slot, &plan, &temporal, use_bounce));
        let fence = self.queue.execute_command_list(list);
        self.frames.end_frame(fence);
        self.temporal.end_frame(recorded.is_ok());
        recorded?;

        self.voxel_history = history;
        self.frame_count += 1;
        self.context.present(&mut self.queue, &self.descriptors, slot)?;
        Ok(())
    }

    fn update_camera(&mut self, delta: f32) {
        let mut speed = CAMERA_SPEED * delta;
        if self.keys.is_down(Keys::SHIFT) {
            speed *= CAMERA_SPRINT;
        }
        if self.keys.is_down(Keys::W) {
            self.camera.walk(speed);
        }
        if self.keys.is_down(Keys::S) {
            self.camera.walk(-speed);
        }
        if self.keys.is_down(Keys::A) {
            self.camera.strafe(-speed);
        }
        if self.keys.is_down(Keys::D) {
            self.camera.strafe(speed);
        }
        self.camera.update_view_matrix();
    }

    fn update_lights(&mut self, delta: f32, total: f32) {
        let view = self.camera.view();
        for light in &mut self.lights {
            match light.ty {
                LightType::Directional => {}
                LightType::Point | LightType::Spot => {
                    light.position_ws.x += (total * 2.0).cos() * delta * 3.0;
                }
            }
        }
        if let Some(sun) = self.lights.first_mut() {
            sun.direction_ws = self.settings.sun.direction().extend(0.0);
            sun.intensity = self.settings.sun.intensity;
        }
        for light in &mut self.lights {
            light.position_vs = view * light.position_ws;
            light.direction_vs = view * light.direction_ws;
        }
    }

    fn pass_constants(&self, temporal: &TemporalFrame, delta: f32, total: f32) -> PassConstants {
        let view = self.camera.view();
        let unjittered_view_proj = self.camera.proj() * view;
        let proj = if temporal.active {
            jittered_projection(self.camera.proj(), temporal.jitter)
        } else {
            self.camera.proj()
        };
        let view_proj = proj * view;
        let prev_view_proj = match self.prev_view_proj {
            Some(prev) if !(temporal.active && temporal.first_frame) => prev,
            _ => unjittered_view_proj,
        };
        let size = Vec2::new(self.context.width() as f32, self.context.height() as f32);

        PassConstants {
            view,
            inv_view: view.inverse(),
            proj,
            inv_proj: proj.inverse(),
            view_proj,
            inv_view_proj: view_proj.inverse(),
            prev_view_proj,
            proj_tex: crate::common::ndc_to_texture() * view_proj,
            eye_pos: self.camera.position(),
            near_z: self.camera.near_z(),
            render_target_size: size,
            inv_render_target_size: size.recip(),
            far_z: self.camera.far_z(),
            total_time: total,
            delta_time: delta,
            enable_gi: self.settings.vxgi.enable_gi as u32,
            jitter: temporal.jitter,
            previous_jitter: temporal.previous_jitter,
        }
    }

    /// Writes every constant buffer of the current ring slot.
    fn upload_constants(&mut self, temporal: &TemporalFrame, delta: f32, total: f32) -> Result<(), RenderError> {
        profiling::scope!("Renderer::upload_constants");

        let pass = self.pass_constants(temporal, delta, total);
        self.prev_view_proj = Some(self.camera.proj() * self.camera.view());

        let sun_direction = self.settings.sun.direction();
        let map_size_px = self.config.shadow_map_size;
        let cascades = Cascades::compute(&self.camera, sun_direction, &self.settings.shadow, map_size_px);
        let shadow = cascades.constants(&self.settings.shadow, map_size_px);
        let ssao = ssao_constants(
            self.camera.proj(),
            map_size(self.context.width(), self.context.height()),
        );
        let voxel = self.voxel_bounds.constants(
            self.targets.voxels.dimension(),
            self.targets.voxels.mip_count(),
            &self.settings.vxgi,
        );
        let lights: Vec<LightConstants> = self.lights.iter().map(LightConstants::from).collect();

        let queue = &self.context.iad.queue;
        let resources = self.frames.resources_mut();
        resources.pass.copy_data(queue, 0, &pass)?;
        resources.shadow.copy_data(queue, 0, &shadow)?;
        resources.ssao.copy_data(queue, 0, &ssao)?;
        resources.voxel.copy_data(queue, 0, &voxel)?;
        resources.lights.copy_all(queue, &lights)?;
        self.scene
            .objects_mut()
            .upload_if_dirty(|objects| resources.objects.copy_all(queue, objects))?;
        self.scene
            .materials_mut()
            .upload_if_dirty(|materials| resources.materials.copy_all(queue, materials))?;
        Ok(())
    }

    fn record(
        &mut self,
        encoder: &mut CommandEncoder,
        slot: usize,
        plan: &FramePlan,
        temporal: &TemporalFrame,
        use_bounce: bool,
    ) -> Result<(), RenderError> {
        profiling::scope!("Renderer::record");

        let Self {
            context,
            descriptors,
            registry,
            state,
            frames,
            samplers,
            passes,
            targets,
            settings,
            scene,
            ..
        } = self;

        let back_buffer = context.back_buffer(slot);
        let depth = context.depth();
        let mut ctx = RecordContext {
            device: &context.iad.device,
            queue: &context.iad.queue,
            encoder,
            descriptors,
            registry,
            bindings: UniversalBindings {
                frame: frames.resources().bind_group(),
                samplers: samplers.bind_group(),
            },
            state,
        };

        ctx.state.clear_transitions();
        ctx.state.transition(back_buffer.texture.label(), ResourceState::RENDER_TARGET)?;

        for pass in plan.passes() {
            match pass {
                PassKind::Shadow => passes.shadow.record(&mut ctx, scene, &targets.shadow_map)?,
                PassKind::Voxelize => passes
                    .vxgi
                    .voxelize(&mut ctx, scene, &targets.shadow_map, &targets.voxels)?,
                PassKind::VoxelCopy => passes.vxgi.copy(&mut ctx, &targets.voxels)?,
                PassKind::VoxelMips => passes.vxgi.generate_mips(&mut ctx, &targets.voxels, false)?,
                PassKind::VoxelBounce => passes.vxgi.bounce(&mut ctx, &targets.voxels)?,
                PassKind::VoxelBounceMips => passes.vxgi.generate_mips(&mut ctx, &targets.voxels, true)?,
                PassKind::GBuffer => passes.gbuffer.record(&mut ctx, scene, &targets.gbuffer, depth)?,
                PassKind::Ssao => passes
                    .ssao
                    .record(&mut ctx, &targets.gbuffer, depth, &targets.ambient)?,
                PassKind::Lighting => {
                    let sources = LightingSources {
                        gbuffer: &targets.gbuffer,
                        depth,
                        shadow_map: &targets.shadow_map,
                        ambient: &targets.ambient,
                        ibl: &targets.ibl,
                        voxel: targets.voxels.radiance_index(use_bounce),
                    };
                    passes.lighting.record(&mut ctx, &sources, back_buffer)?;
                }
                PassKind::Skybox => {
                    passes
                        .skybox
                        .record(&mut ctx, targets.ibl.environment_index(), depth, back_buffer)?
                }
                PassKind::VoxelDebug => {
                    passes
                        .vxgi
                        .debug_draw(&mut ctx, &targets.voxels, &settings.vxgi, depth, back_buffer)?
                }
                PassKind::Taa => passes.taa.record(
                    &mut ctx,
                    temporal,
                    &targets.gbuffer,
                    depth,
                    &targets.taa,
                    back_buffer,
                )?,
                PassKind::Post => passes.post.record(
                    &mut ctx,
                    &plan.post,
                    &settings.post,
                    &targets.gbuffer,
                    &targets.post,
                    back_buffer,
                )?,
            }
        }

        ctx.state.transition(back_buffer.texture.label(), ResourceState::PRESENT)?;
        Ok(())
    }
}
