// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue for the demo application. The render core never depends on
//! this crate; backends only see raw window handles.
pub use winit;

use anyhow::Result;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// Opens the main window with the given title and logical size.
pub fn open_window(event_loop: &ActiveEventLoop, title: &str, size: (u32, u32)) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(size.0.max(1), size.1.max(1)));
    let window = event_loop.create_window(attrs)?;
    let inner = window.inner_size();
    tracing::info!("window {}x{}", inner.width, inner.height);
    Ok(window)
}
