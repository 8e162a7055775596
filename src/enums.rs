/// Anatomical viewing planes, also used as the names of spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub fn label(&self) -> &'static str {
        match self {
            Orientation::Axial => "Axial",
            Orientation::Coronal => "Coronal",
            Orientation::Sagittal => "Sagittal",
        }
    }
}

/// How slices of one series are ordered before stacking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Stable sort on the instance index; duplicates keep discovery order.
    #[default]
    InstanceNumber,
    /// Stable sort on the slice position projected onto the slice normal.
    ImagePositionPatient,
    None,
}
