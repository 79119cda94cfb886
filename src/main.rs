//! dxcore 演示程序
//!
//! 打开一个窗口，用 `Dx12Context` 跑帧循环：每帧写入一份常量，
//! 清空后备缓冲和深度缓冲，然后 Present。
//!
//! # 使用方法
//!
//! ```bash
//! cargo run
//! cargo run -- --frames 3 --no-vsync --debug-layer
//! ```
//!
//! # 命令行参数
//!
//! - `--width <value>` / `--height <value>`: 窗口尺寸
//! - `--frames <value>`: 在途帧数（2 或 3）
//! - `--no-vsync`: 关闭垂直同步
//! - `--debug-layer`: 启用 D3D12 调试层

use anyhow::Context;
use tracing::info;

use dxcore::core::{log, Config};

fn main() -> anyhow::Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args().skip(1));

    // 3. 验证配置
    config.validate().context("Invalid configuration")?;

    // 4. 初始化日志系统
    let log_file = config
        .logging
        .file_output
        .then(|| config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);

    info!(version = env!("CARGO_PKG_VERSION"), "dxcore starting");
    info!(
        width = config.window.width,
        height = config.window.height,
        frames = config.graphics.frame_count,
        vsync = config.graphics.vsync,
        "Graphics configuration"
    );

    run(config)
}

#[cfg(target_os = "windows")]
fn run(config: Config) -> anyhow::Result<()> {
    demo::run(config)
}

#[cfg(not(target_os = "windows"))]
fn run(_config: Config) -> anyhow::Result<()> {
    tracing::error!("DirectX 12 is only available on Windows");
    anyhow::bail!("DirectX 12 is only available on Windows")
}

#[cfg(target_os = "windows")]
mod demo {
    use std::ffi::c_void;
    use std::time::Instant;

    use anyhow::{bail, Context};
    use bytemuck::{Pod, Zeroable};
    use raw_window_handle::{HasWindowHandle, RawWindowHandle};
    use tracing::{debug, error, info};
    use windows::Win32::Foundation::HWND;
    use winit::dpi::PhysicalSize;
    use winit::event::{Event, WindowEvent};
    use winit::event_loop::EventLoop;
    use winit::window::WindowBuilder;

    use dxcore::core::Config;
    use dxcore::gfx::dx12::{ColorBuffer, DefaultBuffer, UploadBuffer};
    use dxcore::gfx::Dx12Context;
    use dxcore::renderer::{ColorBufferDesc, ResourceState};

    /// 每帧常量
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    struct FrameConstants {
        time: f32,
        aspect_ratio: f32,
        frame_index: u32,
        _padding: u32,
    }

    const QUAD: [[f32; 3]; 4] = [
        [-0.5, -0.5, 0.0],
        [-0.5, 0.5, 0.0],
        [0.5, -0.5, 0.0],
        [0.5, 0.5, 0.0],
    ];

    struct Demo {
        context: Dx12Context,
        constants: UploadBuffer<FrameConstants>,
        quad: DefaultBuffer,
        offscreen: ColorBuffer,
        clear_color: [f32; 4],
        start: Instant,
    }

    impl Demo {
        fn draw(&mut self) -> dxcore::core::Result<()> {
            let slot = self.context.begin_frame()?;

            let constants = FrameConstants {
                time: self.start.elapsed().as_secs_f32(),
                aspect_ratio: self.context.aspect_ratio(),
                frame_index: slot as u32,
                _padding: 0,
            };
            self.constants.copy_data(slot as u64, &constants)?;

            self.offscreen.clear(&mut self.context)?;
            self.context
                .transition(self.offscreen.resource_id(), ResourceState::ALL_SHADER_RESOURCE)?;
            self.context.clear(self.clear_color)?;

            let vertex_buffer = self.quad.vertex_buffer_view()?;
            unsafe {
                self.context
                    .command_list()
                    .IASetVertexBuffers(0, Some(&[vertex_buffer]));
            }

            self.context.end_frame()?;
            Ok(())
        }
    }

    pub fn run(config: Config) -> anyhow::Result<()> {
        let event_loop = EventLoop::new().context("Failed to create event loop")?;
        let window = WindowBuilder::new()
            .with_title(config.window.title.as_str())
            .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
            .with_resizable(config.window.resizable)
            .build(&event_loop)
            .context("Failed to create window")?;

        let hwnd = match window.window_handle()?.as_raw() {
            RawWindowHandle::Win32(handle) => HWND(handle.hwnd.get() as *mut c_void),
            _ => bail!("Unsupported window handle"),
        };

        let size = window.inner_size();
        let mut context = Dx12Context::new(hwnd, size.width, size.height, &config)
            .context("Failed to initialize DirectX 12")?;

        let frame_count = context.frame_count() as u64;
        let constants = UploadBuffer::<FrameConstants>::new(context.device(), frame_count, true)?;
        for i in 0..frame_count {
            constants.create_constant_buffer_view(&mut context, i)?;
        }

        let quad = DefaultBuffer::from_slice(&mut context, &QUAD, ResourceState::VERTEX_AND_CONSTANT_BUFFER)?;
        let offscreen = ColorBuffer::new(
            &mut context,
            &ColorBufferDesc::new(256, 256, config.graphics.back_buffer_format)
                .with_clear_color([0.0, 0.0, 0.0, 1.0])
                .with_name("offscreen"),
        )?;

        info!("Renderer initialized, entering main loop");

        let mut demo = Demo {
            context,
            constants,
            quad,
            offscreen,
            clear_color: config.graphics.clear_color,
            start: Instant::now(),
        };

        event_loop.run(move |event, elwt| match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    info!("Close requested, shutting down");
                    elwt.exit();
                }
                WindowEvent::Resized(size) => {
                    debug!(width = size.width, height = size.height, "Window resized");
                    if let Err(e) = demo.context.resize(size.width, size.height) {
                        error!("Resize failed: {}", e);
                        elwt.exit();
                    }
                }
                WindowEvent::RedrawRequested => {
                    if let Err(e) = demo.draw() {
                        error!("Draw failed: {}", e);
                        elwt.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => window.request_redraw(),
            _ => {}
        })?;

        Ok(())
    }
}
