//! Geometry service seam used by the split coordinator.

use anyhow::{Result, anyhow, bail};

/// Splits a task boundary into smaller parts that together cover it.
///
/// Implementations only see and return opaque references; the core never
/// inspects geometry content.
pub trait GeometryService: Send + Sync {
    fn split_geometry(&self, geometry_ref: &str) -> Result<Vec<String>>;
}

/// Splits `z/x/y` tile references into their four children at `z + 1`.
#[derive(Debug, Clone)]
pub struct TileSplitter {
    max_zoom: u32,
}

impl TileSplitter {
    pub fn new(max_zoom: u32) -> Self {
        Self { max_zoom }
    }
}

impl Default for TileSplitter {
    fn default() -> Self {
        // Tiles beyond z18 are smaller than a useful mapping unit
        Self::new(18)
    }
}

fn parse_tile(geometry_ref: &str) -> Result<(u32, u64, u64)> {
    let mut parts = geometry_ref.split('/');
    let mut next = |name: &str| {
        parts
            .next()
            .ok_or_else(|| anyhow!("tile reference '{geometry_ref}' is missing {name}"))
    };
    let z = next("zoom")?.parse::<u32>()?;
    let x = next("x")?.parse::<u64>()?;
    let y = next("y")?.parse::<u64>()?;
    if parts.next().is_some() {
        bail!("tile reference '{geometry_ref}' has trailing components");
    }
    Ok((z, x, y))
}

impl GeometryService for TileSplitter {
    fn split_geometry(&self, geometry_ref: &str) -> Result<Vec<String>> {
        let (z, x, y) = parse_tile(geometry_ref)?;
        if z >= self.max_zoom {
            bail!("tile {geometry_ref} is already at the maximum zoom {}", self.max_zoom);
        }

        let children = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .into_iter()
            .map(|(dx, dy)| format!("{}/{}/{}", z + 1, x * 2 + dx, y * 2 + dy))
            .collect();
        Ok(children)
    }
}
