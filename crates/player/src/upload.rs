use tracing::warn;

/// Double-buffered upload of decoded pixels into an `egui` texture.
/// Writing the next frame goes to the staging buffer the texture is not
/// currently reading from, so decode cadence never waits on render
/// cadence. When staging allocation fails the uploader degrades to a
/// direct synchronous path; slower, still correct.
pub struct TextureUploader {
    texture: Option<egui::TextureHandle>,
    placeholder: Option<egui::TextureHandle>,
    staging: [Vec<u8>; 2],
    write: usize,
    width: usize,
    height: usize,
    direct: bool,
}

impl Default for TextureUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureUploader {
    pub fn new() -> Self {
        Self {
            texture: None,
            placeholder: None,
            staging: [Vec::new(), Vec::new()],
            write: 0,
            width: 0,
            height: 0,
            direct: false,
        }
    }

    /// Upload one RGBA frame. `force` writes through both staging buffers
    /// so the image is guaranteed visible on the next rendered frame even
    /// with a swap in flight (used for preroll and just-seeked frames).
    pub fn upload(
        &mut self,
        ctx: &egui::Context,
        width: usize,
        height: usize,
        pixels: &[u8],
        force: bool,
    ) {
        if pixels.len() != width * height * 4 {
            return;
        }

        if width != self.width || height != self.height {
            self.reallocate(width, height);
            // first frame at this size goes up immediately, single-buffered
            self.set_texture(ctx, pixels);
            if !self.direct {
                self.staging[0].copy_from_slice(pixels);
                self.staging[1].copy_from_slice(pixels);
            }
            return;
        }

        if self.direct {
            self.set_texture(ctx, pixels);
            return;
        }

        self.staging[self.write].copy_from_slice(pixels);
        let image = egui::ColorImage::from_rgba_unmultiplied(
            [width, height],
            &self.staging[self.write],
        );
        self.apply(ctx, image);
        self.write = 1 - self.write;

        if force {
            self.staging[self.write].copy_from_slice(pixels);
            let image = egui::ColorImage::from_rgba_unmultiplied(
                [width, height],
                &self.staging[self.write],
            );
            self.apply(ctx, image);
            self.write = 1 - self.write;
        }
    }

    /// Most recent frame, or the black placeholder before any arrived.
    pub fn texture(&mut self, ctx: &egui::Context) -> egui::TextureHandle {
        if let Some(handle) = &self.texture {
            return handle.clone();
        }
        self.placeholder
            .get_or_insert_with(|| {
                ctx.load_texture(
                    "playback_placeholder",
                    egui::ColorImage::new([2, 2], egui::Color32::BLACK),
                    egui::TextureOptions::LINEAR,
                )
            })
            .clone()
    }

    pub fn has_frame(&self) -> bool {
        self.texture.is_some()
    }

    pub fn resolution(&self) -> Option<(usize, usize)> {
        if self.width > 0 {
            Some((self.width, self.height))
        } else {
            None
        }
    }

    pub fn is_double_buffered(&self) -> bool {
        !self.direct
    }

    /// Drop the current frame and staging state; used on close.
    pub fn reset(&mut self) {
        self.texture = None;
        self.staging = [Vec::new(), Vec::new()];
        self.write = 0;
        self.width = 0;
        self.height = 0;
    }

    fn reallocate(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.write = 0;
        let len = width * height * 4;
        for buf in &mut self.staging {
            buf.clear();
            if buf.try_reserve_exact(len.saturating_sub(buf.capacity())).is_err() {
                warn!("Staging allocation of {len} bytes failed, using direct upload");
                self.direct = true;
                self.staging = [Vec::new(), Vec::new()];
                return;
            }
            buf.resize(len, 0);
        }
        self.direct = false;
    }

    fn set_texture(&mut self, ctx: &egui::Context, pixels: &[u8]) {
        let image = egui::ColorImage::from_rgba_unmultiplied([self.width, self.height], pixels);
        self.apply(ctx, image);
    }

    fn apply(&mut self, ctx: &egui::Context, image: egui::ColorImage) {
        if let Some(handle) = &mut self.texture {
            if handle.size() == [self.width, self.height] {
                handle.set(image, egui::TextureOptions::LINEAR);
                return;
            }
        }
        self.texture = Some(ctx.load_texture("playback_frame", image, egui::TextureOptions::LINEAR));
    }
}
