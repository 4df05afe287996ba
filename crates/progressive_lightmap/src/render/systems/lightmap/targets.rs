//! Ping-pong render target pair
//!
//! Two equally sized float targets. One is active (written this step), the
//! other previous (read as blend input); `swap` flips the roles after every
//! step, so the previous buffer always holds the last completed blend.

use crate::render::api::{
    BackendResult, ClearColor, PixelFormat, RenderHost, RenderTargetDescriptor, RenderTargetHandle, TextureHandle,
};

/// One accumulation buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulationBuffer {
    /// Render target
    pub target: RenderTargetHandle,
    /// Texture view of the target
    pub texture: TextureHandle,
}

/// Exclusively owned pair of accumulation buffers
#[derive(Debug)]
pub struct RenderTargetPair {
    buffer_a: AccumulationBuffer,
    buffer_b: AccumulationBuffer,
    active_is_a: bool,
    resolution: u32,
    format: PixelFormat,
}

impl RenderTargetPair {
    /// Allocate both buffers
    ///
    /// Falls back to half-float storage when the host cannot render to the
    /// requested format. Buffer A starts active.
    pub fn allocate<H: RenderHost + ?Sized>(host: &mut H, resolution: u32, preferred: PixelFormat) -> BackendResult<Self> {
        let format = Self::select_format(host, preferred);
        let desc = RenderTargetDescriptor {
            width: resolution,
            height: resolution,
            format,
        };

        let buffer_a = Self::allocate_buffer(host, &desc)?;
        let buffer_b = match Self::allocate_buffer(host, &desc) {
            Ok(buffer) => buffer,
            Err(e) => {
                let _ = host.dispose_render_target(buffer_a.target);
                return Err(e);
            }
        };

        log::debug!("Allocated lightmap targets {resolution}x{resolution} ({format:?})");
        Ok(Self {
            buffer_a,
            buffer_b,
            active_is_a: true,
            resolution,
            format,
        })
    }

    fn select_format<H: RenderHost + ?Sized>(host: &H, preferred: PixelFormat) -> PixelFormat {
        if host.supports_format(preferred) {
            return preferred;
        }
        let fallback = PixelFormat::Rgba16Float;
        if preferred != fallback && host.supports_format(fallback) {
            log::warn!("{preferred:?} render targets unsupported, falling back to {fallback:?}");
            return fallback;
        }
        log::warn!("No float render target format reported by host, trying {preferred:?} anyway");
        preferred
    }

    fn allocate_buffer<H: RenderHost + ?Sized>(host: &mut H, desc: &RenderTargetDescriptor) -> BackendResult<AccumulationBuffer> {
        let target = host.create_render_target(desc)?;
        match host.render_target_texture(target) {
            Ok(texture) => Ok(AccumulationBuffer { target, texture }),
            Err(e) => {
                let _ = host.dispose_render_target(target);
                Err(e)
            }
        }
    }

    /// Reset both buffers to transparent zero
    ///
    /// Leaves the active flag alone and restores the host's clear colour and
    /// bound target afterwards.
    pub fn clear<H: RenderHost + ?Sized>(&self, host: &mut H) -> BackendResult<()> {
        let saved_color = host.clear_color();
        let saved_target = host.render_target();

        host.set_clear_color(ClearColor::TRANSPARENT);
        let result = self.clear_both(host);

        host.set_clear_color(saved_color);
        let restored = host.set_render_target(saved_target);
        result.and(restored)
    }

    fn clear_both<H: RenderHost + ?Sized>(&self, host: &mut H) -> BackendResult<()> {
        for buffer in [self.buffer_a, self.buffer_b] {
            host.set_render_target(Some(buffer.target))?;
            host.clear()?;
        }
        Ok(())
    }

    /// Flip the active buffer
    pub fn swap(&mut self) {
        self.active_is_a = !self.active_is_a;
    }

    /// Buffer written this step
    pub fn active(&self) -> AccumulationBuffer {
        if self.active_is_a {
            self.buffer_a
        } else {
            self.buffer_b
        }
    }

    /// Buffer read as blend input this step
    pub fn previous(&self) -> AccumulationBuffer {
        if self.active_is_a {
            self.buffer_b
        } else {
            self.buffer_a
        }
    }

    /// Texture holding the most recently completed blend
    pub fn result_texture(&self) -> TextureHandle {
        self.previous().texture
    }

    /// Whether buffer A is the active one
    pub fn active_is_a(&self) -> bool {
        self.active_is_a
    }

    /// Both buffers, A first
    pub fn buffers(&self) -> [AccumulationBuffer; 2] {
        [self.buffer_a, self.buffer_b]
    }

    /// Side length in pixels
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Storage format actually allocated
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Release both buffers
    pub fn dispose<H: RenderHost + ?Sized>(self, host: &mut H) -> BackendResult<()> {
        let a = host.dispose_render_target(self.buffer_a.target);
        let b = host.dispose_render_target(self.buffer_b.target);
        a.and(b)
    }
}
