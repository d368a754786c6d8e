//! Lucent 演示程序
//!
//! 加载配置、初始化日志和崩溃处理器，然后按配置的后端运行帧循环，
//! 每帧以物体管线绘制配置的 OBJ 模型（带漫反射贴图和半兰伯特光照）：
//!
//! - DirectX 12：winit 窗口 + 事件循环，窗口关闭时退出
//! - Soft：无窗口，渲染 `graphics.headless_frames` 帧后退出
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 命令行覆盖
//! cargo run -- --soft --frames 10
//! cargo run -- --dx12 --width 1920 --height 1080
//! ```
//!
//! 设备丢失时整体重建一次图形上下文，再次失败或出现其他错误时以退出码 1 结束。

use anyhow::Context;
use nalgebra::{Matrix4, Vector3};
use tracing::{debug, info};

use lucent::assets::model::{self, GpuModel, ModelData, Transform};
use lucent::assets::shader;
use lucent::assets::texture::{self, GpuTexture, TextureData};
use lucent::core::config::{AssetsConfig, Config, GraphicsBackend, GraphicsConfig};
use lucent::core::{crash, log};
use lucent::gfx::backend::{Backend, Device, SurfaceTarget};
use lucent::gfx::soft::{Soft, SoftDevice, SoftDeviceDescriptor};
use lucent::renderer::pipeline::ObjectPipeline;
use lucent::renderer::GraphicsContext;
use lucent::{engine_error, engine_info, engine_warn};

/// 垂直视场角（弧度）
const FOV_Y: f32 = 0.45;
const NEAR_CLIP: f32 = 0.1;
const FAR_CLIP: f32 = 100.0;
/// 每帧绕 Y 轴旋转的角度
const ROTATION_PER_FRAME: f32 = 0.01;

fn main() {
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args().skip(1));

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_file = config
        .logging
        .file_output
        .then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    crash::install_crash_handler(&config.crash.dump_dir);

    info!(version = env!("CARGO_PKG_VERSION"), "Lucent starting...");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        back_buffers = config.graphics.back_buffer_count,
        vsync = config.graphics.vsync,
        "Graphics configuration"
    );

    if let Err(e) = run(&config) {
        engine_error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    info!("Lucent exited normally");
}

fn run(config: &Config) -> anyhow::Result<()> {
    let assets = Assets::load(&config.assets).context("Failed to load assets")?;

    match config.graphics.backend {
        GraphicsBackend::Soft => run_headless(config, &assets),
        GraphicsBackend::Dx12 => run_windowed(config, &assets),
    }
}

/// 启动时从磁盘加载的资源
struct Assets {
    model: Option<ModelData>,
    /// 模型的漫反射贴图，没有贴图时为 1x1 白色
    texture: TextureData,
    shader_dir: String,
}

impl Assets {
    fn load(config: &AssetsConfig) -> lucent::core::Result<Self> {
        let model = match &config.model {
            Some(path) => Some(model::load_obj(path)?),
            None => {
                debug!("No model configured, rendering clear color only");
                None
            }
        };
        let texture = match model.as_ref().and_then(|m| m.material.texture_path.as_ref()) {
            Some(path) => texture::load_texture(path)?,
            None => TextureData::solid([255, 255, 255, 255])?,
        };

        Ok(Self {
            model,
            texture,
            shader_dir: config.shader_dir.clone(),
        })
    }
}

/// 物体绘制需要的 GPU 对象
struct ObjectDraw<B: Backend> {
    pipeline: ObjectPipeline<B>,
    model: GpuModel<B>,
    texture: GpuTexture<B>,
}

impl<B: Backend> ObjectDraw<B> {
    fn new(context: &mut GraphicsContext<B>, model: &ModelData, assets: &Assets) -> lucent::core::Result<Self> {
        let (vs, ps) = shader::compile_object_shaders::<B>(context.device(), &assets.shader_dir)?;
        let pipeline = ObjectPipeline::<B>::new(context.device(), &vs, &ps)?;
        let model = GpuModel::<B>::new(context.device(), model)?;
        let texture = GpuTexture::upload(context, &assets.texture, "Diffuse Texture")?;
        Ok(Self { pipeline, model, texture })
    }
}

/// 图形上下文加上演示用的模型和相机
struct Scene<B: Backend> {
    // 物体持有的资源必须先于上下文释放
    object: Option<ObjectDraw<B>>,
    context: GraphicsContext<B>,
    world: Transform,
    camera: Transform,
}

impl<B: Backend> Scene<B> {
    fn new(device: B::Device, surface: &SurfaceTarget, graphics: &GraphicsConfig, assets: &Assets) -> lucent::core::Result<Self> {
        engine_info!(
            backend = B::NAME,
            adapter = %device.adapter_info().name,
            feature_level = ?device.feature_level(),
            "Creating graphics context"
        );
        let mut context = GraphicsContext::new(device, surface, graphics)?;

        let object = assets
            .model
            .as_ref()
            .map(|model| ObjectDraw::new(&mut context, model, assets))
            .transpose()?;

        Ok(Self {
            object,
            context,
            world: Transform::default(),
            camera: Transform {
                translate: Vector3::new(0.0, 0.0, -10.0),
                ..Transform::default()
            },
        })
    }

    fn render(&mut self) -> lucent::core::Result<()> {
        self.world.rotate.y += ROTATION_PER_FRAME;

        if let Some(object) = &mut self.object {
            let view = self.camera.matrix().try_inverse().unwrap_or_else(Matrix4::identity);
            let projection = model::perspective_fov(FOV_Y, self.context.aspect_ratio(), NEAR_CLIP, FAR_CLIP);
            object.model.update_transform(&self.world.matrix(), &(projection * view));
        }

        let list = self.context.pre_draw()?;
        if let Some(object) = &self.object {
            object.pipeline.bind(list);
            object.model.draw(list, object.texture.gpu_handle());
        }
        self.context.post_draw()
    }

    fn resize(&mut self, width: u32, height: u32) -> lucent::core::Result<()> {
        self.context.resize(width, height)
    }
}

fn run_headless(config: &Config, assets: &Assets) -> anyhow::Result<()> {
    let surface = SurfaceTarget::headless(config.window.width, config.window.height);
    let create = || -> lucent::core::Result<Scene<Soft>> {
        let device = SoftDevice::new(&SoftDeviceDescriptor::default())?;
        Scene::new(device, &surface, &config.graphics, assets)
    };

    let mut scene = create().context("Failed to create graphics context")?;
    let mut recreated = false;
    let mut rendered = 0;

    while rendered < config.graphics.headless_frames {
        match scene.render() {
            Ok(()) => rendered += 1,
            Err(e) if e.is_device_lost() && !recreated => {
                engine_warn!(error = %e, "Device lost, recreating graphics context");
                recreated = true;
                drop(scene);
                scene = create().context("Failed to recreate graphics context")?;
            }
            Err(e) => return Err(e).context(format!("Frame {} failed", rendered)),
        }
    }

    engine_info!(frames = rendered, "Headless run finished");
    Ok(())
}

#[cfg(target_os = "windows")]
fn run_windowed(config: &Config, assets: &Assets) -> anyhow::Result<()> {
    use lucent::gfx::dx12::{Dx12, Dx12Device, Dx12DeviceDescriptor};
    use winit::dpi::PhysicalSize;
    use winit::event::{Event, WindowEvent};
    use winit::event_loop::EventLoop;
    use winit::raw_window_handle::HasWindowHandle;
    use winit::window::WindowBuilder;

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(&config.window.title)
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .with_resizable(config.window.resizable)
        .build(&event_loop)
        .context("Failed to create window")?;

    let raw_window = window.window_handle()?.as_raw();
    let surface_for = |size: PhysicalSize<u32>| SurfaceTarget {
        window: Some(raw_window),
        width: size.width,
        height: size.height,
    };

    let device_desc = Dx12DeviceDescriptor {
        debug_layer: config.graphics.debug_layer,
        gpu_based_validation: config.graphics.gpu_based_validation,
    };
    let create = |surface: &SurfaceTarget| -> lucent::core::Result<Scene<Dx12>> {
        let device = Dx12Device::new(&device_desc)?;
        Scene::new(device, surface, &config.graphics, assets)
    };

    let mut scene = Some(create(&surface_for(window.inner_size())).context("Failed to create graphics context")?);
    let mut recreated = false;
    let mut failure: Option<anyhow::Error> = None;

    engine_info!("Entering main loop...");
    event_loop.run(|event, elwt| {
        let result = match event {
            Event::WindowEvent { event: WindowEvent::CloseRequested, .. } => {
                info!("Close requested, shutting down...");
                // 先排空 GPU 再销毁窗口
                scene = None;
                elwt.exit();
                Ok(())
            }
            Event::WindowEvent { event: WindowEvent::Resized(size), .. } => {
                debug!(width = size.width, height = size.height, "Window resized");
                scene.as_mut().map_or(Ok(()), |s| s.resize(size.width, size.height))
            }
            Event::WindowEvent { event: WindowEvent::RedrawRequested, .. } => {
                scene.as_mut().map_or(Ok(()), |s| s.render())
            }
            Event::AboutToWait => {
                window.request_redraw();
                Ok(())
            }
            _ => Ok(()),
        };

        let Err(e) = result else { return };
        if e.is_device_lost() && !recreated {
            engine_warn!(error = %e, "Device lost, recreating graphics context");
            recreated = true;
            scene = None;
            match create(&surface_for(window.inner_size())) {
                Ok(new_scene) => scene = Some(new_scene),
                Err(e) => {
                    failure = Some(anyhow::Error::new(e).context("Failed to recreate graphics context"));
                    elwt.exit();
                }
            }
        } else {
            failure = Some(anyhow::Error::new(e).context("Frame failed"));
            scene = None;
            elwt.exit();
        }
    })?;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(not(target_os = "windows"))]
fn run_windowed(_config: &Config, _assets: &Assets) -> anyhow::Result<()> {
    anyhow::bail!("The DirectX 12 backend is only available on Windows, run with --soft instead")
}
