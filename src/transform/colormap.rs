//! Colormaps used to visualise single-channel depth estimates

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub type Lut = [[u8; 3]; 256];

/// Named colormap. The declaration order is the default rotation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Colormap {
    Plasma,
    Viridis,
    Jet,
    Hot,
    Cool,
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Colormap {
    pub const ALL: [Colormap; 9] = [
        Colormap::Plasma,
        Colormap::Viridis,
        Colormap::Jet,
        Colormap::Hot,
        Colormap::Cool,
        Colormap::Spring,
        Colormap::Summer,
        Colormap::Autumn,
        Colormap::Winter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Colormap::Plasma => "Plasma",
            Colormap::Viridis => "Viridis",
            Colormap::Jet => "Jet",
            Colormap::Hot => "Hot",
            Colormap::Cool => "Cool",
            Colormap::Spring => "Spring",
            Colormap::Summer => "Summer",
            Colormap::Autumn => "Autumn",
            Colormap::Winter => "Winter",
        }
    }

    /// 256-entry RGB lookup table, built on first use
    pub fn lut(self) -> &'static Lut {
        &LUTS[self as usize]
    }

    pub fn apply(self, value: u8) -> [u8; 3] {
        self.lut()[value as usize]
    }

    fn sample(self, x: f32) -> [f32; 3] {
        match self {
            Colormap::Plasma => interpolate(&PLASMA_STOPS, x),
            Colormap::Viridis => interpolate(&VIRIDIS_STOPS, x),
            Colormap::Jet => [
                (1.5 - (4.0 * x - 3.0).abs()).clamp(0.0, 1.0),
                (1.5 - (4.0 * x - 2.0).abs()).clamp(0.0, 1.0),
                (1.5 - (4.0 * x - 1.0).abs()).clamp(0.0, 1.0),
            ],
            Colormap::Hot => [
                (3.0 * x).clamp(0.0, 1.0),
                (3.0 * x - 1.0).clamp(0.0, 1.0),
                (3.0 * x - 2.0).clamp(0.0, 1.0),
            ],
            Colormap::Cool => [x, 1.0 - x, 1.0],
            Colormap::Spring => [1.0, x, 1.0 - x],
            Colormap::Summer => [x, 0.5 + 0.5 * x, 0.4],
            Colormap::Autumn => [1.0, x, 0.0],
            Colormap::Winter => [0.0, x, 1.0 - 0.5 * x],
        }
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown colormap `{0}`")]
pub struct UnknownColormap(pub String);

impl FromStr for Colormap {
    type Err = UnknownColormap;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Colormap::ALL
            .into_iter()
            .find(|map| map.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownColormap(s.to_string()))
    }
}

static LUTS: Lazy<[Lut; 9]> = Lazy::new(|| Colormap::ALL.map(build_lut));

fn build_lut(map: Colormap) -> Lut {
    let mut lut = [[0u8; 3]; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let rgb = map.sample(i as f32 / 255.0);
        *entry = rgb.map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8);
    }
    lut
}

// Matplotlib reference colours at x = 0, 1/8, ..., 1
const VIRIDIS_STOPS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [71, 44, 122],
    [59, 81, 139],
    [44, 113, 142],
    [33, 144, 141],
    [39, 173, 129],
    [92, 200, 99],
    [170, 220, 50],
    [253, 231, 37],
];

const PLASMA_STOPS: [[u8; 3]; 9] = [
    [13, 8, 135],
    [75, 3, 161],
    [125, 3, 168],
    [168, 34, 150],
    [203, 70, 121],
    [229, 107, 93],
    [248, 148, 65],
    [253, 195, 40],
    [240, 249, 33],
];

fn interpolate(stops: &[[u8; 3]; 9], x: f32) -> [f32; 3] {
    let scaled = x.clamp(0.0, 1.0) * (stops.len() - 1) as f32;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(stops.len() - 1);
    let t = scaled - lo as f32;

    let mut out = [0.0; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let a = stops[lo][c] as f32;
        let b = stops[hi][c] as f32;
        *value = (a + (b - a) * t) / 255.0;
    }
    out
}
