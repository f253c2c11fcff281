//! Chunked upload and download over the files endpoint.
//!
//! Both directions are strictly sequential: chunk *n + 1* is not sent until
//! the response to chunk *n* is in, because the first response carries the
//! file id every later chunk needs.

use serde_json::json;
use teahaz_protocol::{
    ChannelId, Chunks, FileChunkReceipt, FileId, MessageId, PayloadCodec, ProtocolError,
    SectionAccumulator, SectionStatus,
};
use teahaz_transport::{HttpRequest, HttpSession};
use tracing::debug;

use crate::{ChatroomError, RequestDispatcher};

/// Where and as whom an upload is made.
pub(crate) struct UploadTarget<'a> {
    pub url: String,
    pub username: &'a str,
    pub channel_id: &'a ChannelId,
    pub reply_id: Option<&'a MessageId>,
}

/// Uploads `data` chunk by chunk and returns the server's file id.
///
/// Returns `Ok(None)` if a chunk failed and a subscriber took the failure.
/// Either way nothing more is sent after the first failed chunk.
pub(crate) async fn upload<S: HttpSession>(
    dispatcher: &RequestDispatcher<S>,
    target: UploadTarget<'_>,
    data: &[u8],
    codec: &dyn PayloadCodec,
    chunk_size: usize,
) -> Result<Option<FileId>, ChatroomError> {
    let mut file_id: Option<FileId> = None;
    let chunks = Chunks::new(data, chunk_size);
    let total = chunks.count_total();

    for chunk in chunks {
        let body = json!({
            "username": target.username,
            "channelID": target.channel_id,
            "replyID": target.reply_id,
            "fileId": file_id,
            "final": chunk.is_final,
            "data": codec.encode(chunk.bytes),
        });

        let Some(response) = dispatcher
            .call(HttpRequest::post(target.url.clone()).json(body))
            .await?
        else {
            debug!(chunk = chunk.index, total, "upload aborted by captured failure");
            return Ok(None);
        };

        if file_id.is_none() {
            let receipt: FileChunkReceipt =
                serde_json::from_value(response).map_err(ProtocolError::from)?;
            file_id = Some(receipt.file_id);
        }
        debug!(chunk = chunk.index, total, bytes = chunk.bytes.len(), "chunk uploaded");
    }

    // Chunks always yields at least one chunk, so the id is set by now.
    file_id.map(Some).ok_or_else(|| {
        ChatroomError::InvalidState("upload finished without a file id".into())
    })
}

/// Downloads a file section by section.
///
/// Returns `Ok(None)` if a section failed and a subscriber took the
/// failure. Bytes received before a failure are discarded; there is no
/// resume.
pub(crate) async fn download<S: HttpSession>(
    dispatcher: &RequestDispatcher<S>,
    url: String,
    file_id: &FileId,
    codec: &dyn PayloadCodec,
) -> Result<Option<Vec<u8>>, ChatroomError> {
    let mut acc = SectionAccumulator::new();

    loop {
        let section = acc.next_section();
        let request = HttpRequest::get(url.clone())
            .header("fileId", file_id.as_str())
            .header("section", section.to_string());

        let Some(body) = dispatcher.call(request).await? else {
            debug!(%file_id, section, "download aborted by captured failure");
            return Ok(None);
        };

        if acc.push(&body, codec)? == SectionStatus::Finished {
            break;
        }
    }

    debug!(%file_id, bytes = acc.len(), "download finished");
    Ok(Some(acc.into_bytes()))
}
