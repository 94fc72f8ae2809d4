use bytes::Bytes;

use crate::{error::Error, types};

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

pub(crate) fn parse_error_xml(body: &str) -> Option<types::XmlError> {
    if body.trim().is_empty() {
        return None;
    }

    quick_xml::de::from_str::<types::XmlError>(body).ok()
}

pub(crate) fn parse_create_multipart_upload(
    body: &str,
) -> Result<types::CreateMultipartUploadOutput, Error> {
    let parsed =
        quick_xml::de::from_str::<types::XmlInitiateMultipartUploadResult>(body).map_err(|e| {
            Error::decode(
                "failed to parse CreateMultipartUpload XML response",
                Some(Box::new(e)),
            )
        })?;
    if parsed.upload_id.trim().is_empty() {
        return Err(Error::decode(
            "CreateMultipartUpload response carried an empty upload id",
            None,
        ));
    }
    Ok(types::CreateMultipartUploadOutput::from(parsed))
}

pub(crate) fn parse_complete_multipart_upload(
    body: &str,
) -> Result<types::CompleteMultipartUploadOutput, Error> {
    if body.trim().is_empty() {
        return Ok(types::CompleteMultipartUploadOutput {
            location: None,
            key: None,
            etag: None,
        });
    }
    let parsed =
        quick_xml::de::from_str::<types::XmlCompleteMultipartUploadResult>(body).map_err(|e| {
            Error::decode(
                "failed to parse CompleteMultipartUpload XML response",
                Some(Box::new(e)),
            )
        })?;
    Ok(types::CompleteMultipartUploadOutput::from(parsed))
}

/// Encodes the completion request. An empty part list is valid for a zero-byte object.
pub(crate) fn encode_complete_multipart_upload(
    parts: &[types::CompletedPart],
) -> Result<Bytes, Error> {
    if parts
        .iter()
        .enumerate()
        .any(|(idx, p)| p.part_number as usize != idx + 1)
    {
        return Err(Error::invalid_config(
            "completed parts must be numbered contiguously from 1",
        ));
    }

    #[derive(serde::Serialize)]
    #[serde(rename = "CompleteMultipartUpload")]
    struct XmlOut<'a> {
        #[serde(rename = "@xmlns")]
        xmlns: &'static str,
        #[serde(rename = "Part")]
        parts: Vec<XmlPart<'a>>,
    }

    #[derive(serde::Serialize)]
    struct XmlPart<'a> {
        #[serde(rename = "PartNumber")]
        part_number: u32,
        #[serde(rename = "ETag")]
        etag: &'a str,
    }

    let xml = quick_xml::se::to_string(&XmlOut {
        xmlns: S3_XMLNS,
        parts: parts
            .iter()
            .map(|p| XmlPart {
                part_number: p.part_number,
                etag: &p.etag,
            })
            .collect(),
    })
    .map_err(|e| {
        Error::decode(
            "failed to encode CompleteMultipartUpload XML",
            Some(Box::new(e)),
        )
    })?;

    Ok(Bytes::from(xml))
}
