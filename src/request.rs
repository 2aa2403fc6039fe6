//! Per-opcode parameter contracts.
//!
//! Each helper extracts and validates the typed arguments one family of
//! methods needs, failing fast with the protocol error the dispatcher will
//! report. Nothing here touches storage; validation fully precedes any
//! response byte.

use crate::error::{PixError, Result};
use crate::geometry::{Coord, PixelShape, Region};
use crate::method::Method;
use crate::params::Params;
use crate::types::ObjectId;

/// Validated arguments of a creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPixelsSpec {
    pub shape: PixelShape,
    pub bytes_per_pixel: u8,
    pub signed: bool,
    pub float: bool,
}

impl NewPixelsSpec {
    /// Parse `Dims` plus the `IsSigned`/`IsFloat` flags.
    ///
    /// `Dims` must carry six positive integers (X,Y,Z,C,T,bytesPerPixel).
    /// Float pixels force signed; an explicit `IsSigned=0` combined with
    /// float is rejected, as is any float depth other than 4 bytes.
    pub fn parse(params: &Params) -> Result<Self> {
        let dims = params
            .get_i64_list("Dims")
            .ok_or_else(|| PixError::missing("Dims"))?;
        if dims.len() < 6 || dims[..6].iter().any(|&v| v < 1) {
            return Err(PixError::Malformed(
                "Dims improperly formed. Expecting numX,numY,numZ,numC,numT,numB, all positive integers"
                    .to_string(),
            ));
        }

        let float = params.flag_set("IsFloat");
        let mut signed = float;
        match params.flag("IsSigned") {
            Some(true) => signed = true,
            Some(false) if float => {
                return Err(PixError::Malformed(
                    "IsSigned must be 1 for floating-point pixels".to_string(),
                ));
            }
            _ => {}
        }

        let bp = dims[5];
        if !(bp == 1 || bp == 2 || bp == 4) {
            return Err(PixError::Malformed(format!(
                "Bytes per pixel must be 1, 2 or 4, not {}",
                bp
            )));
        }
        if float && bp != 4 {
            return Err(PixError::Malformed(format!(
                "Bytes per pixel must be 4 for floating-point pixels, not {}",
                bp
            )));
        }

        Ok(Self {
            shape: PixelShape::new(
                dims[0] as u32,
                dims[1] as u32,
                dims[2] as u32,
                dims[3] as u32,
                dims[4] as u32,
            ),
            bytes_per_pixel: bp as u8,
            signed,
            float,
        })
    }
}

/// Extract the `PixelsID` under the per-method exemption rules.
///
/// A present identifier must be positive for every method; an absent one is
/// only an error for methods outside the exemption set.
pub fn pixels_id(method: Method, params: &Params) -> Result<Option<ObjectId>> {
    match params.get("PixelsID") {
        Some(_) => {
            // best-effort parse: garbage is the same as absent
            match params.get_u64("PixelsID") {
                Some(id) if id > 0 => Ok(Some(id)),
                Some(_) => Err(PixError::Malformed("PixelsID must be positive".to_string())),
                None => missing_unless_exempt(method),
            }
        }
        None => missing_unless_exempt(method),
    }
}

fn missing_unless_exempt(method: Method) -> Result<Option<ObjectId>> {
    if method.requires_pixels_id() {
        Err(PixError::missing("PixelsID"))
    } else {
        Ok(None)
    }
}

/// Extract a required, positive `FileID`.
pub fn file_id(params: &Params) -> Result<ObjectId> {
    match params.get_u64("FileID") {
        Some(id) if id > 0 => Ok(id),
        _ => Err(PixError::missing("FileID")),
    }
}

/// The request's coordinate parameters; absent or unparsable axes stay
/// unconstrained. X is never carried as a parameter.
pub fn coords(params: &Params) -> Coord {
    Coord::new(
        Coord::UNSET,
        params.get_i64("theY").unwrap_or(Coord::UNSET),
        params.get_i64("theZ").unwrap_or(Coord::UNSET),
        params.get_i64("theC").unwrap_or(Coord::UNSET),
        params.get_i64("theT").unwrap_or(Coord::UNSET),
    )
}

/// The region selector a pixel-scoped method operates on.
pub fn region_for(method: Method, params: &Params) -> Result<Region> {
    let at = coords(params);
    match method {
        Method::SetPixels | Method::GetPixels | Method::Convert => Ok(Region::WholeSet),
        Method::SetStack | Method::GetStack | Method::ConvertStack => Ok(Region::Stack {
            c: at.c,
            t: at.t,
        }),
        Method::SetPlane | Method::GetPlane | Method::ConvertPlane | Method::ConvertTiff => {
            Ok(Region::Plane {
                z: at.z,
                c: at.c,
                t: at.t,
            })
        }
        Method::SetRows | Method::GetRows | Method::ConvertRows => Ok(Region::RowRange {
            y: at.y,
            z: at.z,
            c: at.c,
            t: at.t,
            rows: params.get_i64("nRows").unwrap_or(1),
        }),
        Method::SetRoi | Method::GetRoi => roi(params),
        _ => Err(PixError::Malformed(format!(
            "{} has no region scope",
            method.name()
        ))),
    }
}

/// Parse the `ROI` parameter: ten comma-separated integers
/// x0,y0,z0,c0,t0,x1,y1,z1,c1,t1.
pub fn roi(params: &Params) -> Result<Region> {
    let raw = params
        .get_i64_list("ROI")
        .ok_or_else(|| PixError::missing("ROI"))?;
    if raw.len() < 10 {
        return Err(PixError::Malformed(
            "ROI improperly formed. Expected x0,y0,z0,c0,t0,x1,y1,z1,c1,t1".to_string(),
        ));
    }
    Ok(Region::Box {
        lo: Coord::new(raw[0], raw[1], raw[2], raw[3], raw[4]),
        hi: Coord::new(raw[5], raw[6], raw[7], raw[8], raw[9]),
    })
}

/// Effective byte span of a file read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSpan {
    pub offset: u64,
    pub length: u64,
    /// True when the span covers the entire file; governs the disposition
    /// header.
    pub whole_file: bool,
}

/// Resolve `Offset`/`Length` against the file's length.
///
/// Defaults are 0 and the remaining bytes. An offset at or past EOF fails;
/// a length running past EOF is silently truncated.
pub fn read_span(params: &Params, file_length: u64) -> Result<ReadSpan> {
    let offset = params.get_u64("Offset").unwrap_or(0);
    if offset >= file_length {
        return Err(PixError::OutOfRange(
            "Offset is greater than the file's length".to_string(),
        ));
    }
    let remaining = file_length - offset;
    let length = params.get_u64("Length").unwrap_or(remaining).min(remaining);
    Ok(ReadSpan {
        offset,
        length,
        whole_file: offset == 0 && length == file_length,
    })
}

/// Required upload size for upload and export-via-upload operations.
pub fn upload_size(params: &Params) -> Result<u64> {
    params
        .get_u64("UploadSize")
        .ok_or_else(|| PixError::missing("UploadSize"))
}

/// Validated arguments of an archive request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub file_ids: Vec<ObjectId>,
    pub name: String,
}

impl ArchiveSpec {
    /// `FileID` is a comma-separated identifier list; `OrigName` is
    /// optional with a fixed default.
    pub fn parse(params: &Params) -> Result<Self> {
        let file_ids = params
            .get_u64_list("FileID")
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| PixError::missing("FileID"))?;
        Ok(Self {
            file_ids,
            name: params.get("OrigName").unwrap_or("images").to_string(),
        })
    }
}

/// Optional thumbnail size: "x,y", both positive when given.
pub fn thumb_size(params: &Params) -> Result<Option<(u32, u32)>> {
    let Some(raw) = params.get_i64_list("Size") else {
        return Ok(None);
    };
    if raw.len() < 2 {
        return Ok(None);
    }
    if raw[0] <= 0 || raw[1] <= 0 {
        return Err(PixError::Malformed(
            "Thumbnail size cannot be zero or negative".to_string(),
        ));
    }
    Ok(Some((raw[0] as u32, raw[1] as u32)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_contract() {
        let spec = NewPixelsSpec::parse(&Params::from_pairs([("Dims", "4,4,1,1,1,2")])).unwrap();
        assert_eq!(spec.shape, PixelShape::new(4, 4, 1, 1, 1));
        assert_eq!(spec.bytes_per_pixel, 2);
        assert!(!spec.signed);
        assert!(!spec.float);

        // any zero axis fails
        assert!(NewPixelsSpec::parse(&Params::from_pairs([("Dims", "4,0,1,1,1,2")])).is_err());
        // bp=3 fails
        assert!(NewPixelsSpec::parse(&Params::from_pairs([("Dims", "4,4,1,1,1,3")])).is_err());
        // five fields is malformed
        assert!(NewPixelsSpec::parse(&Params::from_pairs([("Dims", "4,4,1,1,1")])).is_err());
        // missing entirely
        assert!(matches!(
            NewPixelsSpec::parse(&Params::from_pairs::<&str, &str, _>([])),
            Err(PixError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_float_rules() {
        // float forces signed
        let spec = NewPixelsSpec::parse(&Params::from_pairs([
            ("Dims", "4,4,1,1,1,4"),
            ("IsFloat", "1"),
        ]))
        .unwrap();
        assert!(spec.float && spec.signed);

        // float with bp=2 fails
        assert!(NewPixelsSpec::parse(&Params::from_pairs([
            ("Dims", "4,4,1,1,1,2"),
            ("IsFloat", "true"),
        ]))
        .is_err());

        // float with an explicit unsigned flag fails
        assert!(NewPixelsSpec::parse(&Params::from_pairs([
            ("Dims", "4,4,1,1,1,4"),
            ("IsFloat", "1"),
            ("IsSigned", "0"),
        ]))
        .is_err());
    }

    #[test]
    fn test_pixels_id_rules() {
        let p = Params::from_pairs([("PixelsID", "12")]);
        assert_eq!(pixels_id(Method::GetPixels, &p).unwrap(), Some(12));

        let p = Params::from_pairs([("PixelsID", "0")]);
        assert!(pixels_id(Method::GetPixels, &p).is_err());
        // positivity holds even for exempt methods
        assert!(pixels_id(Method::ZipFiles, &p).is_err());

        let p = Params::from_pairs::<&str, &str, _>([]);
        assert!(pixels_id(Method::GetPixels, &p).is_err());
        assert_eq!(pixels_id(Method::NewPixels, &p).unwrap(), None);

        // unparsable is absent
        let p = Params::from_pairs([("PixelsID", "twelve")]);
        assert!(pixels_id(Method::GetPixels, &p).is_err());
        assert_eq!(pixels_id(Method::UploadFile, &p).unwrap(), None);
    }

    #[test]
    fn test_read_span_truncation() {
        let p = Params::from_pairs([("Offset", "90"), ("Length", "50")]);
        let span = read_span(&p, 100).unwrap();
        assert_eq!(span.offset, 90);
        assert_eq!(span.length, 10);
        assert!(!span.whole_file);

        let p = Params::from_pairs([("Offset", "100")]);
        assert!(read_span(&p, 100).is_err());

        let p = Params::from_pairs::<&str, &str, _>([]);
        let span = read_span(&p, 100).unwrap();
        assert_eq!((span.offset, span.length), (0, 100));
        assert!(span.whole_file);
    }

    #[test]
    fn test_region_selection() {
        let p = Params::from_pairs([("theC", "1"), ("theT", "0")]);
        assert_eq!(
            region_for(Method::GetStack, &p).unwrap(),
            Region::Stack { c: 1, t: 0 }
        );

        let p = Params::from_pairs([("theY", "2"), ("theZ", "0"), ("theC", "0"), ("theT", "0")]);
        assert_eq!(
            region_for(Method::SetRows, &p).unwrap(),
            Region::RowRange {
                y: 2,
                z: 0,
                c: 0,
                t: 0,
                rows: 1
            }
        );

        // absent coordinates stay unconstrained; completeness is judged at
        // span resolution, not here
        let p = Params::from_pairs::<&str, &str, _>([]);
        assert_eq!(
            region_for(Method::GetPlane, &p).unwrap(),
            Region::Plane { z: -1, c: -1, t: -1 }
        );
    }

    #[test]
    fn test_roi_contract() {
        let p = Params::from_pairs([("ROI", "0,0,0,0,0,3,3,0,0,0")]);
        let region = roi(&p).unwrap();
        assert_eq!(
            region,
            Region::Box {
                lo: Coord::new(0, 0, 0, 0, 0),
                hi: Coord::new(3, 3, 0, 0, 0),
            }
        );

        let p = Params::from_pairs([("ROI", "0,0,0,0,0,3,3")]);
        assert!(roi(&p).is_err());
        let p = Params::from_pairs::<&str, &str, _>([]);
        assert!(matches!(roi(&p), Err(PixError::MissingParameter(_))));
    }

    #[test]
    fn test_archive_spec() {
        let p = Params::from_pairs([("FileID", "1,5,9")]);
        let spec = ArchiveSpec::parse(&p).unwrap();
        assert_eq!(spec.file_ids, vec![1, 5, 9]);
        assert_eq!(spec.name, "images");

        let p = Params::from_pairs([("FileID", "1"), ("OrigName", "run42")]);
        assert_eq!(ArchiveSpec::parse(&p).unwrap().name, "run42");

        let p = Params::from_pairs::<&str, &str, _>([]);
        assert!(ArchiveSpec::parse(&p).is_err());
    }

    #[test]
    fn test_thumb_size() {
        let p = Params::from_pairs([("Size", "64,48")]);
        assert_eq!(thumb_size(&p).unwrap(), Some((64, 48)));
        let p = Params::from_pairs([("Size", "0,48")]);
        assert!(thumb_size(&p).is_err());
        let p = Params::from_pairs::<&str, &str, _>([]);
        assert_eq!(thumb_size(&p).unwrap(), None);
    }
}
