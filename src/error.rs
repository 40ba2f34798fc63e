use image::ImageError;

use std::error::Error;
use std::fmt;
use std::io::Error as IOError;

#[derive(Debug)]
pub struct PlateError(PlateErrorKind);

#[derive(Debug)]
pub enum PlateErrorKind {
    IOError(IOError),
    ImageError(ImageError),
    OcrError(String),
}

impl PlateError {
    pub fn kind(&self) -> &PlateErrorKind {
        &self.0
    }

    pub fn ocr(message: impl Into<String>) -> Self {
        Self(PlateErrorKind::OcrError(message.into()))
    }
}

impl<T> From<T> for PlateError
where T: Into<PlateErrorKind>
{
    fn from(e: T) -> Self {
        Self(e.into())
    }
}

impl fmt::Display for PlateError {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            PlateErrorKind::IOError(e) => e.fmt(f),
            PlateErrorKind::ImageError(e) => e.fmt(f),
            PlateErrorKind::OcrError(message) => write!(f, "{}", message),
        }
    }
}

impl Error for PlateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.kind() {
            PlateErrorKind::IOError(e) => e.source(),
            PlateErrorKind::ImageError(e) => e.source(),
            PlateErrorKind::OcrError(_) => None,
        }
    }
}

impl From<IOError> for PlateErrorKind {
    fn from(e: IOError) -> Self {
        Self::IOError(e)
    }
}

impl From<ImageError> for PlateErrorKind {
    fn from(e: ImageError) -> Self {
        Self::ImageError(e)
    }
}
