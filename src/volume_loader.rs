use crate::error::{Error, Result};
use crate::outcome::Outcome;
use crate::registry::{FormatReader, RawSource};
use crate::series::Slice;

use dicom::{
    core::Tag,
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, s};
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// Tags tried, in order, when naming a series.
pub const DEFAULT_LABEL_TAGS: [Tag; 3] = [
    tags::SERIES_DESCRIPTION,
    tags::PROTOCOL_NAME,
    tags::STUDY_DESCRIPTION,
];

/// Whether bytes 128..132 of `path` spell `DICM`.
pub fn is_dicom_file(path: impl AsRef<Path>) -> bool {
    let mut header = [0u8; PREAMBLE_LEN + 4];
    fs::File::open(path.as_ref())
        .and_then(|mut file| file.read_exact(&mut header))
        .is_ok_and(|_| &header[PREAMBLE_LEN..] == MAGIC)
}

/// A DICOM file, or a directory holding at least one below it.
pub fn is_dicom(source: impl AsRef<Path>) -> bool {
    let source = source.as_ref();
    if source.is_dir() {
        collect_files(source)
            .map(|files| files.iter().any(is_dicom_file))
            .unwrap_or(false)
    } else {
        is_dicom_file(source)
    }
}

/// File name without a trailing `.dcm`.
pub fn dicom_label(path: impl AsRef<Path>) -> String {
    let name = path
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(".dcm").map(str::to_string).unwrap_or(name)
}

/// Every regular file below `root`, sorted by path.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)?.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Decodes DICOM files and directories into slices.
pub struct DicomReader {
    label_tags: Vec<Tag>,
}

impl Default for DicomReader {
    fn default() -> Self {
        Self {
            label_tags: DEFAULT_LABEL_TAGS.to_vec(),
        }
    }
}

impl DicomReader {
    pub fn with_label_tags(label_tags: Vec<Tag>) -> Self {
        Self { label_tags }
    }

    /// Turn one object and its decoded image into a slice. `None` when the
    /// object carries no SeriesInstanceUID. Geometry tags that are absent
    /// stay `None`; the assembler decides what to do about it.
    pub fn slice_from_object(
        &self,
        dicom_object: &InMemDicomObject,
        grid: Array2<u16>,
    ) -> Option<Slice<u16>> {
        let series_id = get_string(dicom_object, tags::SERIES_INSTANCE_UID)?;
        Some(self.describe(dicom_object, series_id, grid))
    }

    fn describe(
        &self,
        dicom_object: &InMemDicomObject,
        series_id: String,
        grid: Array2<u16>,
    ) -> Slice<u16> {
        let instance = dicom_object
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|e| e.to_int::<i64>().ok())
            .unwrap_or(0);

        let mut slice = Slice::new(series_id, instance, grid).with_label_candidates(
            self.label_tags
                .iter()
                .map(|tag| get_string(dicom_object, *tag))
                .collect(),
        );
        slice.position = get_vec3(dicom_object, tags::IMAGE_POSITION_PATIENT);
        slice.orientation = get_floats(dicom_object, tags::IMAGE_ORIENTATION_PATIENT)
            .filter(|v| v.len() == 6)
            .map(|v| ([v[0], v[1], v[2]], [v[3], v[4], v[5]]));
        slice.pixel_spacing = get_floats(dicom_object, tags::PIXEL_SPACING)
            .filter(|v| v.len() == 2)
            .map(|v| [v[0], v[1]]);
        slice
    }

    /// A lone file is a dataset of its own: it is named after the file and
    /// falls back to that name when it has no SeriesInstanceUID.
    fn standalone_slice(
        &self,
        dicom_object: &InMemDicomObject,
        path: &Path,
        grid: Array2<u16>,
    ) -> Slice<u16> {
        let label = dicom_label(path);
        let series_id = get_string(dicom_object, tags::SERIES_INSTANCE_UID)
            .unwrap_or_else(|| label.clone());
        self.describe(dicom_object, series_id, grid)
            .with_label_candidates(vec![Some(label)])
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn open_image(path: &Path) -> Result<(FileDicomObject<InMemDicomObject>, Array2<u16>)> {
        let dicom_object = open_file(path)?;
        let grid = Self::decode_image(&dicom_object).ok_or_else(|| {
            Error::series_decode(path.display().to_string(), "undecodable pixel data")
        })?;
        Ok((dicom_object, grid))
    }

    fn read_file(&self, path: &Path) -> Result<Slice<u16>> {
        let (dicom_object, grid) = Self::open_image(path)?;
        self.slice_from_object(&dicom_object, grid).ok_or_else(|| {
            Error::series_decode(path.display().to_string(), "missing SeriesInstanceUID")
        })
    }

    fn read_directory(&self, directory: &Path) -> Result<Outcome<Vec<Slice<u16>>>> {
        let mut outcome = Outcome::new(Vec::new());
        for path in collect_files(directory)?
            .into_iter()
            .filter(|path| is_dicom_file(path))
        {
            match self.read_file(&path) {
                Ok(slice) => outcome.value.push(slice),
                Err(error) => outcome.warn(error),
            }
        }
        if outcome.value.is_empty() {
            return Err(Error::NotFound(directory.display().to_string()));
        }
        Ok(outcome)
    }
}

impl FormatReader<u16> for DicomReader {
    fn name(&self) -> &str {
        "DICOM file or directory"
    }

    fn detect(&self, source: &Path) -> bool {
        is_dicom(source)
    }

    fn read(&self, source: &Path) -> Result<Outcome<RawSource<u16>>> {
        if source.is_dir() {
            return Ok(self.read_directory(source)?.map(RawSource::Slices));
        }
        let (dicom_object, grid) = Self::open_image(source)?;
        let slice = self.standalone_slice(&dicom_object, source, grid);
        Ok(Outcome::new(RawSource::Slices(vec![slice])))
    }
}

fn get_string(dicom_object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = dicom_object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches('\0').trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn get_floats(dicom_object: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    dicom_object.element(tag).ok()?.to_multi_float64().ok()
}

fn get_vec3(dicom_object: &InMemDicomObject, tag: Tag) -> Option<[f64; 3]> {
    get_floats(dicom_object, tag)
        .filter(|v| v.len() == 3)
        .map(|v| [v[0], v[1], v[2]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::dicom_value;
    use std::io::Write;

    fn object(elements: Vec<(Tag, VR, PrimitiveValue)>) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(
            elements
                .into_iter()
                .map(|(tag, vr, value)| DataElement::new(tag, vr, value)),
        )
    }

    fn image() -> Array2<u16> {
        Array2::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as u16)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("medical-volume-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_file(path: &Path, magic: &[u8]) {
        let mut file = fs::File::create(path).unwrap();
        file.write_all(&[0u8; PREAMBLE_LEN]).unwrap();
        file.write_all(magic).unwrap();
    }

    #[test]
    fn detects_preamble() {
        let dir = scratch_dir("detect");
        let nested = dir.join("nested");
        fs::create_dir_all(&nested).unwrap();
        write_file(&nested.join("image"), b"DICM");
        write_file(&dir.join("other.bin"), b"NOPE");

        assert!(is_dicom_file(nested.join("image")));
        assert!(!is_dicom_file(dir.join("other.bin")));
        assert!(!is_dicom_file(dir.join("missing")));
        assert!(is_dicom(&dir));

        let empty = scratch_dir("empty");
        assert!(!is_dicom(&empty));

        fs::remove_dir_all(dir).unwrap();
        fs::remove_dir_all(empty).unwrap();
    }

    #[test]
    fn label_strips_dcm_extension() {
        assert_eq!(dicom_label("/data/CT_small.dcm"), "CT_small");
        assert_eq!(dicom_label("/data/IM0001"), "IM0001");
        assert_eq!(dicom_label("/data/scan.dcm.bak"), "scan.dcm.bak");
    }

    #[test]
    fn directory_without_dicom_is_not_found() {
        let dir = scratch_dir("none");
        write_file(&dir.join("notes.txt"), b"TEXT");
        let result = DicomReader::default().read(&dir);
        assert!(matches!(result, Err(Error::NotFound(_))));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn slice_carries_geometry_tags() {
        let dicom_object = object(vec![
            (tags::SERIES_INSTANCE_UID, VR::UI, dicom_value!(Str, "1.2.840.1")),
            (tags::INSTANCE_NUMBER, VR::IS, dicom_value!(Str, "7")),
            (
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                dicom_value!(Strs, ["-8", "-8.5", "4"]),
            ),
            (
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                dicom_value!(Strs, ["1", "0", "0", "0", "0.6", "0.8"]),
            ),
            (tags::PIXEL_SPACING, VR::DS, dicom_value!(Strs, ["0.5", "0.75"])),
            (tags::SERIES_DESCRIPTION, VR::LO, dicom_value!(Str, "  ")),
            (tags::PROTOCOL_NAME, VR::LO, dicom_value!(Str, "T1 MPRAGE")),
            (tags::STUDY_DESCRIPTION, VR::LO, dicom_value!(Str, "Head")),
        ]);
        let slice = DicomReader::default()
            .slice_from_object(&dicom_object, image())
            .unwrap();

        assert_eq!(slice.series_id, "1.2.840.1");
        assert_eq!(slice.instance_index, 7);
        assert_eq!(slice.shape(), (2, 3));
        assert_eq!(slice.position, Some([-8.0, -8.5, 4.0]));
        assert_eq!(
            slice.orientation,
            Some(([1.0, 0.0, 0.0], [0.0, 0.6, 0.8]))
        );
        assert_eq!(slice.pixel_spacing, Some([0.5, 0.75]));
        // Blank SeriesDescription counts as absent.
        assert_eq!(
            slice.label_candidates,
            vec![None, Some("T1 MPRAGE".to_string()), Some("Head".to_string())]
        );
    }

    #[test]
    fn malformed_geometry_tags_are_left_out() {
        let dicom_object = object(vec![
            (tags::SERIES_INSTANCE_UID, VR::UI, dicom_value!(Str, "1.2.840.2")),
            (tags::IMAGE_POSITION_PATIENT, VR::DS, dicom_value!(Strs, ["1", "2"])),
            (
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                dicom_value!(Strs, ["1", "0", "0"]),
            ),
            (tags::PIXEL_SPACING, VR::DS, dicom_value!(Str, "0.5")),
        ]);
        let slice = DicomReader::default()
            .slice_from_object(&dicom_object, image())
            .unwrap();

        assert_eq!(slice.instance_index, 0);
        assert_eq!(slice.position, None);
        assert_eq!(slice.orientation, None);
        assert_eq!(slice.pixel_spacing, None);
        assert_eq!(slice.label_candidates, vec![None, None, None]);
    }

    #[test]
    fn custom_label_tags_replace_defaults() {
        let dicom_object = object(vec![
            (tags::SERIES_INSTANCE_UID, VR::UI, dicom_value!(Str, "1.2.840.3")),
            (tags::SERIES_DESCRIPTION, VR::LO, dicom_value!(Str, "Axial")),
            (tags::STUDY_DESCRIPTION, VR::LO, dicom_value!(Str, "Head")),
        ]);
        let slice = DicomReader::with_label_tags(vec![tags::STUDY_DESCRIPTION])
            .slice_from_object(&dicom_object, image())
            .unwrap();
        assert_eq!(slice.label_candidates, vec![Some("Head".to_string())]);
    }

    #[test]
    fn series_object_needs_uid() {
        let dicom_object = object(vec![(tags::INSTANCE_NUMBER, VR::IS, dicom_value!(Str, "1"))]);
        assert!(
            DicomReader::default()
                .slice_from_object(&dicom_object, image())
                .is_none()
        );
    }

    #[test]
    fn standalone_file_falls_back_to_file_name() {
        let reader = DicomReader::default();
        let anonymous = object(vec![(tags::PROTOCOL_NAME, VR::LO, dicom_value!(Str, "Scout"))]);
        let slice = reader.standalone_slice(&anonymous, Path::new("/data/CT_small.dcm"), image());
        assert_eq!(slice.series_id, "CT_small");
        assert_eq!(slice.label_candidates, vec![Some("CT_small".to_string())]);

        let identified = object(vec![(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, "1.2.840.4"),
        )]);
        let slice = reader.standalone_slice(&identified, Path::new("/data/IM0001"), image());
        assert_eq!(slice.series_id, "1.2.840.4");
        assert_eq!(slice.label_candidates, vec![Some("IM0001".to_string())]);
    }

    #[test]
    fn directory_filter_skips_non_dicom_files() {
        let dir = scratch_dir("filter");
        write_file(&dir.join("a.dcm"), b"DICM");
        write_file(&dir.join("b.txt"), b"TEXT");
        let dicom_files: Vec<PathBuf> = collect_files(&dir)
            .unwrap()
            .into_iter()
            .filter(|path| is_dicom_file(path))
            .collect();
        assert_eq!(dicom_files, vec![dir.join("a.dcm")]);
        fs::remove_dir_all(dir).unwrap();
    }
}
