//! 🌱 常用功能一览.
//!
//! `use irocs::prelude::*;` 即可获得拟合根坐标系需要的大部分类型.

pub use crate::{Idx3d, Vec3};

pub use crate::consts::label::{BACKGROUND, EPIDERMIS, UNASSIGNED};
pub use crate::consts::{MIN_EPIDERMIS_MARKERS, MIN_SHELL_POINTS};

pub use crate::data::{DebugArchive, IntensityVolume, Segmentation, VolumeAttr};
pub use crate::error::{AttachError, Cancelled, ConfigError, FitError, SegmentError};
pub use crate::progress::{Progress, ProgressEvent, ProgressReporter, ProgressState, Worker};

pub use crate::nucleus::{Marker, Nucleus};
pub use crate::segment::{segment_cells, SegmentParams};
pub use crate::shell::{extract_shell, ShellParams};

pub use crate::axis::{AxisCoordinates, EnergyWeights};
pub use crate::rct::{Irocs, IrocsParams};
pub use crate::sct::{ShellCoordinateTransform, ShellFitParams, SurfaceMesh};

pub use crate::attach::{
    attach_irocs_to_marker_set, attach_irocs_to_markers, attach_irocs_to_raw_volume,
    attach_irocs_to_segmentation, dense_coordinates, AttachState, CoordinateVolumes,
    SegmentationAttachParams,
};

#[cfg(feature = "serde")]
pub use crate::persist::PersistError;
