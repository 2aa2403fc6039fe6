//! Method registry: static name-to-opcode table and per-method contracts.
//!
//! Resolution is an exact, case-sensitive match against a fixed table built
//! at compile time. An unknown name is a distinct outcome rather than a
//! fault, so the dispatcher can report "method doesn't exist" with zero side
//! effects.

/// Acquisition mode a method needs for its pixel set, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No pixel-set handle is opened.
    None,
    /// Header metadata only.
    Info,
    /// Pixel payload reads; the set must be finished.
    Read,
    /// Pixel payload writes; the set must not be finished.
    Write,
}

/// Supported request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    // Pixel-set methods
    Pixels,
    NewPixels,
    PixelsInfo,
    PixelsSha1,
    SetPixels,
    GetPixels,
    FinishPixels,
    Convert,
    DeletePixels,

    // Row methods
    SetRows,
    GetRows,
    ConvertRows,

    // Plane methods
    Plane,
    SetPlane,
    GetPlane,
    GetPlaneStats,
    GetPlaneHist,
    ConvertPlane,
    ConvertTiff,

    // Stack methods
    Stack,
    SetStack,
    GetStack,
    GetStackStats,
    GetStackHist,
    ConvertStack,

    // ROI methods
    SetRoi,
    GetRoi,

    // File methods
    FileInfo,
    FileSha1,
    UploadFile,
    ReadFile,
    DeleteFile,
    ZipFiles,

    // Utility methods
    GetLocalPath,
    ImportOmeFile,
    ExportOmeFile,
    Composite,
    GetThumb,
    IsOmeXml,
}

/// The full registry, wire name first. Build-time immutable.
pub const METHODS: &[(&str, Method)] = &[
    ("Pixels", Method::Pixels),
    ("NewPixels", Method::NewPixels),
    ("PixelsInfo", Method::PixelsInfo),
    ("PixelsSHA1", Method::PixelsSha1),
    ("SetPixels", Method::SetPixels),
    ("GetPixels", Method::GetPixels),
    ("FinishPixels", Method::FinishPixels),
    ("Convert", Method::Convert),
    ("DeletePixels", Method::DeletePixels),
    ("SetRows", Method::SetRows),
    ("GetRows", Method::GetRows),
    ("ConvertRows", Method::ConvertRows),
    ("Plane", Method::Plane),
    ("SetPlane", Method::SetPlane),
    ("GetPlane", Method::GetPlane),
    ("GetPlaneStats", Method::GetPlaneStats),
    ("GetPlaneHist", Method::GetPlaneHist),
    ("ConvertPlane", Method::ConvertPlane),
    ("ConvertTIFF", Method::ConvertTiff),
    ("Stack", Method::Stack),
    ("SetStack", Method::SetStack),
    ("GetStack", Method::GetStack),
    ("GetStackStats", Method::GetStackStats),
    ("GetStackHist", Method::GetStackHist),
    ("ConvertStack", Method::ConvertStack),
    ("SetROI", Method::SetRoi),
    ("GetROI", Method::GetRoi),
    ("FileInfo", Method::FileInfo),
    ("FileSHA1", Method::FileSha1),
    ("UploadFile", Method::UploadFile),
    ("ReadFile", Method::ReadFile),
    ("DeleteFile", Method::DeleteFile),
    ("ZipFiles", Method::ZipFiles),
    ("GetLocalPath", Method::GetLocalPath),
    ("ImportOMEfile", Method::ImportOmeFile),
    ("ExportOMEfile", Method::ExportOmeFile),
    ("Composite", Method::Composite),
    ("GetThumb", Method::GetThumb),
    ("IsOMExml", Method::IsOmeXml),
];

/// Resolve a wire name to a method. Exact, case-sensitive.
pub fn resolve(name: &str) -> Option<Method> {
    METHODS
        .iter()
        .find(|(wire, _)| *wire == name)
        .map(|(_, method)| *method)
}

impl Method {
    /// The wire name this method resolves from.
    pub fn name(&self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, method)| method == self)
            .map(|(wire, _)| *wire)
            .unwrap_or("?")
    }

    /// Whether the method requires a positive `PixelsID`.
    ///
    /// Creation, file-only, import/export, existence-check, path-lookup,
    /// delete-file and archive operations are exempt.
    pub fn requires_pixels_id(&self) -> bool {
        !matches!(
            self,
            Method::NewPixels
                | Method::FileInfo
                | Method::FileSha1
                | Method::ReadFile
                | Method::UploadFile
                | Method::ImportOmeFile
                | Method::ExportOmeFile
                | Method::IsOmeXml
                | Method::DeleteFile
                | Method::GetLocalPath
                | Method::ZipFiles
        )
    }

    /// Acquisition mode for the method's pixel set.
    pub fn access(&self) -> Access {
        match self {
            Method::PixelsInfo
            | Method::PixelsSha1
            | Method::DeletePixels
            | Method::GetLocalPath => Access::Info,

            Method::GetPixels
            | Method::GetRows
            | Method::GetPlane
            | Method::GetStack
            | Method::GetRoi
            | Method::GetPlaneStats
            | Method::GetPlaneHist
            | Method::GetStackStats
            | Method::GetStackHist
            | Method::Composite => Access::Read,

            Method::SetPixels
            | Method::SetRows
            | Method::SetPlane
            | Method::SetStack
            | Method::SetRoi
            | Method::FinishPixels
            | Method::Convert
            | Method::ConvertRows
            | Method::ConvertPlane
            | Method::ConvertStack
            | Method::ConvertTiff => Access::Write,

            _ => Access::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_is_exact() {
        assert_eq!(resolve("GetPixels"), Some(Method::GetPixels));
        assert_eq!(resolve("PixelsSHA1"), Some(Method::PixelsSha1));
        assert_eq!(resolve("getpixels"), None);
        assert_eq!(resolve("GETPIXELS"), None);
        assert_eq!(resolve(""), None);
        assert_eq!(resolve("NoSuchMethod"), None);
    }

    #[test]
    fn test_names_round_trip() {
        for (wire, method) in METHODS {
            assert_eq!(resolve(wire), Some(*method));
            assert_eq!(method.name(), *wire);
        }
    }

    #[test]
    fn test_id_exemptions() {
        assert!(!Method::NewPixels.requires_pixels_id());
        assert!(!Method::ZipFiles.requires_pixels_id());
        assert!(!Method::ReadFile.requires_pixels_id());
        assert!(Method::GetPixels.requires_pixels_id());
        assert!(Method::FinishPixels.requires_pixels_id());
        assert!(Method::Composite.requires_pixels_id());
    }

    #[test]
    fn test_access_modes() {
        assert_eq!(Method::PixelsInfo.access(), Access::Info);
        assert_eq!(Method::GetStack.access(), Access::Read);
        assert_eq!(Method::ConvertTiff.access(), Access::Write);
        assert_eq!(Method::UploadFile.access(), Access::None);
        assert_eq!(Method::GetThumb.access(), Access::None);
    }
}
