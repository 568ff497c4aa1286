// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Octant identifiers.
//!
//! The eight octants of a node are named by three half-spaces:
//! Left (`-X`) or Right (`+X`), Front (`-Y`) or Back (`+Y`), Top (`+Z`) or Bottom (`-Z`).
//!
//! | id | X     | Y     | Z      |
//! |----|-------|-------|--------|
//! | 0  | Left  | Front | Top    |
//! | 1  | Right | Front | Top    |
//! | 2  | Left  | Back  | Top    |
//! | 3  | Right | Back  | Top    |
//! | 4  | Left  | Front | Bottom |
//! | 5  | Right | Front | Bottom |
//! | 6  | Left  | Back  | Bottom |
//! | 7  | Right | Back  | Bottom |

use glam::DVec3;

use crate::types::Aabb3D;

bitflags::bitflags! {
    /// Half-space bits composing an [`OctantId`].
    ///
    /// A cleared bit selects the opposite half: Left, Front, Top.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OctantBits: u8 {
        /// `+X` half.
        const RIGHT  = 0b0000_0001;
        /// `+Y` half.
        const BACK   = 0b0000_0010;
        /// `-Z` half.
        const BOTTOM = 0b0000_0100;
    }
}

/// One of the eight octants of a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum OctantId {
    /// Left, Front, Top.
    LeftFrontTop = 0,
    /// Right, Front, Top.
    RightFrontTop = 1,
    /// Left, Back, Top.
    LeftBackTop = 2,
    /// Right, Back, Top.
    RightBackTop = 3,
    /// Left, Front, Bottom.
    LeftFrontBottom = 4,
    /// Right, Front, Bottom.
    RightFrontBottom = 5,
    /// Left, Back, Bottom.
    LeftBackBottom = 6,
    /// Right, Back, Bottom.
    RightBackBottom = 7,
}

impl OctantId {
    /// All octants in canonical order.
    pub const ALL: [Self; 8] = [
        Self::LeftFrontTop,
        Self::RightFrontTop,
        Self::LeftBackTop,
        Self::RightBackTop,
        Self::LeftFrontBottom,
        Self::RightFrontBottom,
        Self::LeftBackBottom,
        Self::RightBackBottom,
    ];

    /// Octant for the given half-space bits.
    pub fn from_bits(bits: OctantBits) -> Self {
        Self::ALL[usize::from(bits.bits())]
    }

    /// Octant with the given canonical index, if `index < 8`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Half-space bits of this octant.
    pub fn bits(self) -> OctantBits {
        OctantBits::from_bits_truncate(self as u8)
    }

    /// Canonical index in `0..8`; also the bucket index of this octant.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether this octant lies on the `-X` side.
    pub fn is_left(self) -> bool {
        !self.bits().contains(OctantBits::RIGHT)
    }

    /// Whether this octant lies on the `+Y` side.
    pub fn is_back(self) -> bool {
        self.bits().contains(OctantBits::BACK)
    }

    /// Whether this octant lies on the `-Z` side.
    pub fn is_bottom(self) -> bool {
        self.bits().contains(OctantBits::BOTTOM)
    }

    /// The slice of `parent` this octant covers.
    pub fn slice(self, parent: &Aabb3D) -> Aabb3D {
        let c = parent.center();
        let (min_x, max_x) = if self.is_left() {
            (parent.min.x, c.x)
        } else {
            (c.x, parent.max.x)
        };
        let (min_y, max_y) = if self.is_back() {
            (c.y, parent.max.y)
        } else {
            (parent.min.y, c.y)
        };
        let (min_z, max_z) = if self.is_bottom() {
            (parent.min.z, c.z)
        } else {
            (c.z, parent.max.z)
        };
        Aabb3D::new(
            DVec3::new(min_x, min_y, min_z),
            DVec3::new(max_x, max_y, max_z),
        )
    }

    /// The octant of a cell that points along `dir`; zero components pick the positive side.
    pub(crate) fn toward(dir: DVec3) -> Self {
        let mut bits = OctantBits::empty();
        bits.set(OctantBits::RIGHT, dir.x >= 0.0);
        bits.set(OctantBits::BACK, dir.y >= 0.0);
        bits.set(OctantBits::BOTTOM, dir.z < 0.0);
        Self::from_bits(bits)
    }

    /// The octant diagonally across the center.
    #[must_use]
    pub fn opposite(self) -> Self {
        Self::from_bits(self.bits().complement())
    }
}
