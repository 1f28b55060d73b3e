use crate::error::{Result, StoreError};

/// Axis-aligned envelope in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bbox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Validate `[x1, y1, x2, y2]` (min lon, min lat, max lon, max lat).
    pub fn from_ordinates(ords: &[f64]) -> Result<Self> {
        let [x1, y1, x2, y2] = ords else {
            return Err(StoreError::InvalidArgument(format!(
                "bounding box needs exactly 4 ordinates, got {}",
                ords.len()
            )));
        };

        if ords.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidArgument(
                "bounding box ordinates must be finite".into(),
            ));
        }
        if x1 > x2 || y1 > y2 {
            return Err(StoreError::InvalidArgument(format!(
                "bounding box is inverted: ({x1}, {y1}, {x2}, {y2})"
            )));
        }
        if *x1 < -180.0 || *x2 > 180.0 || *y1 < -90.0 || *y2 > 90.0 {
            return Err(StoreError::InvalidArgument(format!(
                "bounding box outside WGS84 range: ({x1}, {y1}, {x2}, {y2})"
            )));
        }

        Ok(Self::new(*x1, *y1, *x2, *y2))
    }

    /// Same checks as `from_ordinates`, for a box built with `new`.
    pub fn validated(self) -> Result<Self> {
        Self::from_ordinates(&self.to_ordinates())
    }

    pub fn point(lat: f64, lon: f64) -> Self {
        Self::new(lon, lat, lon, lat)
    }

    pub fn to_ordinates(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn intersects(&self, other: &Bbox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    pub fn pack(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, v) in self.to_ordinates().iter().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn unpack(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 32 {
            return None;
        }
        let f = |i: usize| {
            let mut a = [0u8; 8];
            a.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            f64::from_le_bytes(a)
        };
        Some(Bbox::new(f(0), f(1), f(2), f(3)))
    }
}

/// Fold an optional running envelope with another one.
pub fn union_opt(acc: Option<Bbox>, b: Bbox) -> Option<Bbox> {
    Some(match acc {
        Some(a) => a.union(&b),
        None => b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinates_must_be_four() {
        assert!(Bbox::from_ordinates(&[0.0, 0.0, 1.0]).is_err());
        assert!(Bbox::from_ordinates(&[0.0, 0.0, 1.0, 1.0, 2.0]).is_err());
        assert!(Bbox::from_ordinates(&[0.0, 0.0, 1.0, 1.0]).is_ok());
    }

    #[test]
    fn inverted_and_nan_rejected() {
        assert!(Bbox::from_ordinates(&[1.0, 0.0, 0.0, 1.0]).is_err());
        assert!(Bbox::from_ordinates(&[0.0, f64::NAN, 1.0, 1.0]).is_err());
        assert!(Bbox::from_ordinates(&[-181.0, 0.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn union_and_containment() {
        let a = Bbox::point(1.0, 1.0);
        let b = Bbox::point(5.0, 3.0);
        let c = Bbox::point(4.0, -2.0);
        let u = union_opt(union_opt(Some(a), b), c).unwrap();
        assert_eq!(u, Bbox::new(-2.0, 1.0, 3.0, 5.0));
        assert!(u.contains_point(2.0, 0.0));
        assert!(!u.contains_point(6.0, 0.0));
        assert!(u.intersects(&Bbox::new(3.0, 5.0, 10.0, 10.0)));
        assert!(!u.intersects(&Bbox::new(3.5, 5.0, 10.0, 10.0)));
    }

    #[test]
    fn pack_roundtrip() {
        let b = Bbox::new(-2.5, 1.25, 3.0, 5.5);
        assert_eq!(Bbox::unpack(&b.pack()), Some(b));
        assert_eq!(Bbox::unpack(&[0u8; 4]), None);
    }
}
