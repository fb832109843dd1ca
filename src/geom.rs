//! Small numeric kernel shared by the whole builder.
//!
//! Everything works in *map units* with `f64` precision; angles are in
//! degrees with 0 = east, 90 = north (the classic node-builder
//! convention, *not* BAMs -- those only appear when writing SEGS).

/// Smallest distance between two points before being considered equal.
pub const DIST_EPSILON: f64 = 1.0 / 128.0;

/// Smallest difference between two angles before being considered equal.
pub const ANG_EPSILON: f64 = 1.0 / 1024.0;

/// Length (in units) below which a cut is "uncomfortably short".
pub const IFFY_LEN: f64 = 4.0;

/// Translate `(dx, dy)` into an angle in degrees, in `[0, 360)`.
pub fn compute_angle(dx: f64, dy: f64) -> f64 {
    if dx == 0.0 {
        return if dy > 0.0 { 90.0 } else { 270.0 };
    }

    let angle = dy.atan2(dx).to_degrees();

    if angle < 0.0 { angle + 360.0 } else { angle }
}

/// Euclidean length of `(dx, dy)`.
#[inline]
pub fn compute_dist(dx: f64, dy: f64) -> f64 {
    (dx * dx + dy * dy).sqrt()
}

/// Round to nearest integer, halfway away from zero (matches the
/// rounding used for every vertex that ends up in a 16-bit lump).
#[inline]
pub fn round_i(v: f64) -> i32 {
    if v < 0.0 { (v - 0.5) as i32 } else { (v + 0.5) as i32 }
}

/// Round `x` *up* to the next power of two.
pub fn round_pow2(x: i32) -> i32 {
    if x <= 2 {
        return x;
    }

    let mut x = x - 1;
    let mut tmp = x / 2;
    while tmp != 0 {
        x |= tmp;
        tmp /= 2;
    }
    x + 1
}

/// Degrees -> 16-bit binary angle as stored in the SEGS lump.
pub fn angle_to_bam(angle: f64) -> u16 {
    let mut result = (angle * 65536.0 / 360.0) as i32;

    if result < 0 {
        result += 65536;
    }

    (result & 0xFFFF) as u16
}

/// Clip the segment `(x1,y1)-(x2,y2)` against an axis-aligned box,
/// Cohen-Sutherland style, and report whether anything survives.
pub fn line_touches_box(
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    mut x1: f64,
    mut y1: f64,
    mut x2: f64,
    mut y2: f64,
) -> bool {
    let mut count = 2;

    loop {
        if y1 > ymax {
            if y2 > ymax {
                return false;
            }
            x1 += (x2 - x1) * (ymax - y1) / (y2 - y1);
            y1 = ymax;
            count = 2;
            continue;
        }

        if y1 < ymin {
            if y2 < ymin {
                return false;
            }
            x1 += (x2 - x1) * (ymin - y1) / (y2 - y1);
            y1 = ymin;
            count = 2;
            continue;
        }

        if x1 > xmax {
            if x2 > xmax {
                return false;
            }
            y1 += (y2 - y1) * (xmax - x1) / (x2 - x1);
            x1 = xmax;
            count = 2;
            continue;
        }

        if x1 < xmin {
            if x2 < xmin {
                return false;
            }
            y1 += (y2 - y1) * (xmin - x1) / (x2 - x1);
            x1 = xmin;
            count = 2;
            continue;
        }

        count -= 1;
        if count == 0 {
            break;
        }

        std::mem::swap(&mut x1, &mut x2);
        std::mem::swap(&mut y1, &mut y2);
    }

    true
}

/*--------------------------- Adler-32 --------------------------------*/

/// Rolling Adler-32, used to checksum the VERTEXES + LINEDEFS lumps so
/// a stale GWA file can be detected by the host.
#[derive(Clone, Copy, Debug)]
pub struct Adler32 {
    s1: u32,
    s2: u32,
}

impl Adler32 {
    pub fn new() -> Adler32 {
        Adler32 { s1: 1, s2: 0 }
    }

    pub fn add_block(&mut self, data: &[u8]) {
        for &b in data {
            self.s1 = (self.s1 + b as u32) % 65521;
            self.s2 = (self.s2 + self.s1) % 65521;
        }
    }

    pub fn finish(self) -> u32 {
        (self.s2 << 16) | self.s1
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Adler32::new()
    }
}

/*============================== Tests ================================*/
