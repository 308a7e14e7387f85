use tracing::debug;

use crate::error::{HatchError, HatchResult};
use crate::project::{AssetSource, CostumeJson};

/// Opacity of each costume pixel, row-major, top row first.
#[derive(Clone, Debug)]
pub struct AlphaMask {
    width: u32,
    height: u32,
    alpha: Vec<u8>,
}

impl AlphaMask {
    pub fn new(width: u32, height: u32, alpha: Vec<u8>) -> HatchResult<Self> {
        if alpha.len() != (width as usize) * (height as usize) {
            return Err(HatchError::asset(format!(
                "alpha mask of {} bytes does not match {width}x{height}",
                alpha.len()
            )));
        }
        Ok(Self {
            width,
            height,
            alpha,
        })
    }

    /// A fully opaque rectangle.
    pub fn solid(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            alpha: vec![255; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn opaque_at(&self, px: f64, py: f64) -> bool {
        if px < 0.0 || py < 0.0 {
            return false;
        }
        let (ix, iy) = (px.floor() as u32, py.floor() as u32);
        if ix >= self.width || iy >= self.height {
            return false;
        }
        self.alpha[(iy as usize) * (self.width as usize) + ix as usize] > 0
    }
}

/// Decodes a costume image into its alpha mask. Only bitmap (`png`, `jpg`)
/// and vector (`svg`) formats are understood.
pub fn decode_mask(data_format: &str, bytes: &[u8]) -> HatchResult<AlphaMask> {
    match data_format.to_ascii_lowercase().as_str() {
        "png" | "jpg" | "jpeg" => {
            let image = image::load_from_memory(bytes)
                .map_err(|e| HatchError::asset(format!("decode {data_format}: {e}")))?
                .to_rgba8();
            let (width, height) = image.dimensions();
            let alpha = image.pixels().map(|p| p.0[3]).collect();
            AlphaMask::new(width, height, alpha)
        }
        "svg" => rasterize_svg(bytes),
        other => Err(HatchError::asset(format!("Unsupported dataFormat {other}"))),
    }
}

fn rasterize_svg(bytes: &[u8]) -> HatchResult<AlphaMask> {
    let opts = usvg::Options::default();
    let tree = usvg::Tree::from_data(bytes, &opts)
        .map_err(|e| HatchError::asset(format!("parse svg: {e}")))?;
    let size = tree.size();
    let width = (size.width().ceil() as u32).max(1);
    let height = (size.height().ceil() as u32).max(1);
    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| HatchError::asset("failed to allocate svg pixmap"))?;
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::identity(),
        &mut pixmap.as_mut(),
    );
    let alpha = pixmap.data().chunks_exact(4).map(|px| px[3]).collect();
    AlphaMask::new(width, height, alpha)
}

/// Where a target currently sits on the stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub direction: f64,
}

/// Axis-aligned box in stage coordinates (y grows upwards).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
}

impl Bounds {
    pub fn point(x: f64, y: f64) -> Self {
        Self {
            left: x,
            right: x,
            bottom: y,
            top: y,
        }
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        !(self.left > other.right
            || other.left > self.right
            || self.bottom > other.top
            || other.bottom > self.top)
    }
}

#[derive(Clone, Debug)]
pub struct Costume {
    pub name: String,
    rotation_center: (f64, f64),
    bitmap_resolution: f64,
    mask: AlphaMask,
}

impl Costume {
    pub fn new(
        name: impl Into<String>,
        mask: AlphaMask,
        rotation_center: (f64, f64),
        bitmap_resolution: f64,
    ) -> Self {
        Self {
            name: name.into(),
            rotation_center,
            bitmap_resolution: if bitmap_resolution > 0.0 {
                bitmap_resolution
            } else {
                1.0
            },
            mask,
        }
    }

    pub fn load(info: &CostumeJson, assets: &dyn AssetSource) -> HatchResult<Self> {
        let asset = info.asset_name()?;
        let bytes = assets.open(&asset)?;
        let mask = decode_mask(&info.data_format, &bytes)
            .map_err(|e| HatchError::asset(format!("costume '{}' ({asset}): {e}", info.name)))?;
        debug!(
            "[Hatch costume] Loaded '{}' {}x{}",
            info.name,
            mask.width(),
            mask.height()
        );
        Ok(Self::new(
            info.name.clone(),
            mask,
            (info.rotation_center_x, info.rotation_center_y),
            info.bitmap_resolution,
        ))
    }

    fn scale(&self, pose: &Pose) -> f64 {
        pose.size / 100.0 / self.bitmap_resolution
    }

    /// Pixel-level hit test: is stage point `(x, y)` over an opaque pixel?
    pub fn contains(&self, pose: &Pose, x: f64, y: f64) -> bool {
        let scale = self.scale(pose);
        if scale <= 0.0 || !scale.is_finite() {
            return false;
        }
        let theta = (pose.direction - 90.0).to_radians();
        let (sin, cos) = theta.sin_cos();
        let (dx, dy) = (x - pose.x, y - pose.y);
        let lx = dx * cos - dy * sin;
        let ly = dx * sin + dy * cos;
        let (cx, cy) = self.rotation_center;
        self.mask.opaque_at(cx + lx / scale, cy - ly / scale)
    }

    /// Box around the scaled and rotated costume.
    pub fn bounds(&self, pose: &Pose) -> Bounds {
        let scale = self.scale(pose);
        let theta = (pose.direction - 90.0).to_radians();
        let (sin, cos) = theta.sin_cos();
        let (cx, cy) = self.rotation_center;
        let (w, h) = (self.mask.width() as f64, self.mask.height() as f64);
        let mut out = Bounds::point(f64::INFINITY, f64::INFINITY);
        out.right = f64::NEG_INFINITY;
        out.top = f64::NEG_INFINITY;
        for (px, py) in [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)] {
            let lx = (px - cx) * scale;
            let ly = (cy - py) * scale;
            let sx = pose.x + lx * cos + ly * sin;
            let sy = pose.y - lx * sin + ly * cos;
            out.left = out.left.min(sx);
            out.right = out.right.max(sx);
            out.bottom = out.bottom.min(sy);
            out.top = out.top.max(sy);
        }
        out
    }
}
