//! The CoE SDO server
//!
//! Serves object dictionary access over the mailbox: expedited transfers for
//! values up to four bytes, normal transfers for values fitting one frame,
//! and toggle-alternated segmented transfers for everything larger. Also
//! implements the SDO Information service for dictionary introspection.
//!
//! Every write against the dictionary goes through the object's transaction
//! protocol: a single-shot [`write`](ObjectAccess::write), or
//! [`begin_write`](ObjectAccess::begin_write) followed by chunks and a
//! terminal [`end_write`](ObjectAccess::end_write) or
//! [`abort_write`](ObjectAccess::abort_write). Every abort path, including
//! toggle errors, master aborts and timeouts, runs the abort phase so the
//! object can release per-transaction resources.

use defmt_or_log::{debug, warn};

use drivecat_common::coe::{
    info_op, AbortCode, CoeHeader, CoeService, SdoInfoHeader, SdoRequest, SdoResponse,
    COE_HEADER_SIZE, SDO_HEADER_SIZE, SDO_INFO_HEADER_SIZE, SEGMENT_HEADER_SIZE,
};
use drivecat_common::constants::mailbox_errors;
use drivecat_common::objects::{find_object_entry, ObjectAccess, ObjectCode, OdEntry};

use crate::mailbox::MAX_MAILBOX_SIZE;

/// Microseconds a segmented transfer may stall before it is aborted
const SDO_TIMEOUT_US: u32 = 1_000_000;

#[derive(Clone, Copy)]
struct Transfer {
    entry: &'static OdEntry<'static>,
    sub: u8,
    /// Toggle value expected on the next segment. The initiate exchange
    /// leaves this at 1, so the first segment carries toggle 1.
    toggle: bool,
    offset: usize,
    total: Option<usize>,
}

enum SdoState {
    Idle,
    Download(Transfer),
    Upload(Transfer),
}

#[derive(Clone, Copy)]
struct OdListProgress {
    list_type: u16,
    next: usize,
}

/// The SDO server state machine
///
/// One transaction is tracked at a time. Requests arrive as CoE mailbox
/// payloads via [`handle_coe`](Self::handle_coe); responses are written back
/// into the caller's frame buffer. [`poll`](Self::poll) drives the protocol
/// timeout and [`continuation`](Self::continuation) emits queued OD-list
/// fragments once the mailbox slot is free again.
pub(crate) struct SdoServer {
    state: SdoState,
    frame_capacity: usize,
    timer_us: u32,
    od_list: Option<OdListProgress>,
}

impl SdoServer {
    pub const fn new() -> Self {
        Self {
            state: SdoState::Idle,
            frame_capacity: 0,
            timer_us: 0,
            od_list: None,
        }
    }

    /// Set the mailbox payload capacity, from the validated channel settings
    pub fn set_frame_capacity(&mut self, capacity: usize) {
        self.frame_capacity = capacity.min(MAX_MAILBOX_SIZE);
    }

    /// Abort any open transaction and drop introspection progress
    pub fn reset(&mut self) {
        if let SdoState::Download(t) = &self.state {
            t.entry.data.abort_write(t.sub);
        }
        self.state = SdoState::Idle;
        self.od_list = None;
        self.timer_us = 0;
    }

    fn segment_capacity(&self) -> usize {
        self.frame_capacity
            .saturating_sub(COE_HEADER_SIZE + SEGMENT_HEADER_SIZE)
    }

    fn normal_capacity(&self) -> usize {
        self.frame_capacity
            .saturating_sub(COE_HEADER_SIZE + SDO_HEADER_SIZE + 4)
    }

    /// Handle a CoE mailbox payload, writing any response frame into `out`
    ///
    /// `Ok(Some(len))` is a response to transmit; `Ok(None)` means the
    /// request was consumed silently; `Err(detail)` asks the caller to send
    /// a mailbox error reply.
    pub fn handle_coe(
        &mut self,
        payload: &[u8],
        od: &'static [OdEntry<'static>],
        out: &mut [u8],
    ) -> Result<Option<usize>, u16> {
        let (coe, body) = CoeHeader::parse(payload).ok_or(mailbox_errors::INVALID_HEADER)?;
        match coe.service_type() {
            Ok(CoeService::SdoRequest) => {
                self.timer_us = 0;
                let result = match SdoRequest::parse(body) {
                    Ok(req) => self.update(req, od, out),
                    Err(code) => {
                        warn!("Unparseable SDO request");
                        self.terminate();
                        (
                            Some(write_response(out, SdoResponse::abort(0, 0, code))),
                            SdoState::Idle,
                        )
                    }
                };
                self.state = result.1;
                Ok(result.0)
            }
            Ok(CoeService::SdoInfo) => self.handle_info(body, od, out).map(Some),
            _ => Err(mailbox_errors::SERVICE_NOT_SUPPORTED),
        }
    }

    /// Advance the protocol timeout; a stalled transfer aborts
    pub fn poll(&mut self, elapsed_us: u32, out: &mut [u8]) -> Option<usize> {
        let (index, sub) = match &self.state {
            SdoState::Idle => return None,
            SdoState::Download(t) | SdoState::Upload(t) => (t.entry.index, t.sub),
        };
        self.timer_us = self.timer_us.saturating_add(elapsed_us);
        if self.timer_us <= SDO_TIMEOUT_US {
            return None;
        }
        warn!("SDO transfer timed out");
        self.terminate();
        self.state = SdoState::Idle;
        Some(write_response(
            out,
            SdoResponse::abort(index, sub, AbortCode::SdoTimeout),
        ))
    }

    /// Emit the next queued OD-list fragment, if one is pending
    pub fn continuation(
        &mut self,
        od: &'static [OdEntry<'static>],
        out: &mut [u8],
    ) -> Option<usize> {
        let progress = self.od_list?;
        Some(self.write_od_list_fragment(od, progress, false, out))
    }

    /// Run the abort phase of an open download transaction
    fn terminate(&mut self) {
        if let SdoState::Download(t) = &self.state {
            t.entry.data.abort_write(t.sub);
        }
    }

    fn update(
        &mut self,
        req: SdoRequest,
        od: &'static [OdEntry<'static>],
        out: &mut [u8],
    ) -> (Option<usize>, SdoState) {
        match &self.state {
            SdoState::Idle => self.idle(req, od, out),
            SdoState::Download(t) => {
                let t = *t;
                self.download_segment(t, req, out)
            }
            SdoState::Upload(t) => {
                let t = *t;
                self.upload_segment(t, req, out)
            }
        }
    }

    fn idle(
        &mut self,
        req: SdoRequest,
        od: &'static [OdEntry<'static>],
        out: &mut [u8],
    ) -> (Option<usize>, SdoState) {
        match req {
            SdoRequest::InitiateDownload {
                index,
                sub,
                complete,
                size,
                data,
                expedited,
            } => {
                if complete {
                    // Complete access is parsed but not served
                    return abort(out, index, sub, AbortCode::UnsupportedAccess);
                }
                let Some(entry) = find_object_entry(od, index) else {
                    return abort(out, index, sub, AbortCode::NoSuchObject);
                };
                let info = match entry.data.sub_info(sub) {
                    Ok(info) => info,
                    Err(code) => return abort(out, index, sub, code),
                };
                if !info.access_type.is_writable() {
                    return abort(out, index, sub, AbortCode::ReadOnly);
                }

                if expedited {
                    if let Err(code) = info.validate_write_size(data.len()) {
                        return abort(out, index, sub, code);
                    }
                    if let Err(code) = entry.data.write(sub, data) {
                        return abort(out, index, sub, code);
                    }
                    debug!("SDO expedited download {:#06x}:{}", index, sub);
                    reply(out, SdoResponse::DownloadAck { index, sub }, SdoState::Idle)
                } else if size.is_some_and(|s| data.len() >= s as usize) {
                    // The whole value arrived with the initiate request
                    let total = size.unwrap() as usize;
                    if let Err(code) = entry.data.write(sub, &data[..total]) {
                        return abort(out, index, sub, code);
                    }
                    reply(out, SdoResponse::DownloadAck { index, sub }, SdoState::Idle)
                } else {
                    let declared = size.map(|s| s as usize);
                    if let Err(code) = entry.data.begin_write(sub, declared) {
                        return abort(out, index, sub, code);
                    }
                    if !data.is_empty() {
                        if let Err(code) = entry.data.write_chunk(sub, 0, data) {
                            entry.data.abort_write(sub);
                            return abort(out, index, sub, code);
                        }
                    }
                    debug!("SDO segmented download {:#06x}:{} begins", index, sub);
                    reply(
                        out,
                        SdoResponse::DownloadAck { index, sub },
                        SdoState::Download(Transfer {
                            entry,
                            sub,
                            toggle: true,
                            offset: data.len(),
                            total: declared,
                        }),
                    )
                }
            }
            SdoRequest::InitiateUpload {
                index,
                sub,
                complete,
            } => {
                if complete {
                    return abort(out, index, sub, AbortCode::UnsupportedAccess);
                }
                let Some(entry) = find_object_entry(od, index) else {
                    return abort(out, index, sub, AbortCode::NoSuchObject);
                };
                let total = match entry.data.read_size(sub) {
                    Ok(size) => size,
                    Err(code) => return abort(out, index, sub, code),
                };

                let mut buf = [0u8; MAX_MAILBOX_SIZE];
                if total <= 4 {
                    let n = match entry.data.read(sub, 0, &mut buf[..total]) {
                        Ok(n) => n,
                        Err(code) => return abort(out, index, sub, code),
                    };
                    reply(
                        out,
                        SdoResponse::ExpeditedUpload {
                            index,
                            sub,
                            data: &buf[..n],
                        },
                        SdoState::Idle,
                    )
                } else if total <= self.normal_capacity() {
                    let n = match entry.data.read(sub, 0, &mut buf[..total]) {
                        Ok(n) => n,
                        Err(code) => return abort(out, index, sub, code),
                    };
                    reply(
                        out,
                        SdoResponse::NormalUpload {
                            index,
                            sub,
                            total: n as u32,
                            data: &buf[..n],
                        },
                        SdoState::Idle,
                    )
                } else {
                    debug!("SDO segmented upload {:#06x}:{}, {} bytes", index, sub, total);
                    reply(
                        out,
                        SdoResponse::UploadAck {
                            index,
                            sub,
                            total: total as u32,
                        },
                        SdoState::Upload(Transfer {
                            entry,
                            sub,
                            toggle: true,
                            offset: 0,
                            total: Some(total),
                        }),
                    )
                }
            }
            // An abort with no open transaction is consumed silently
            SdoRequest::Abort { .. } => (None, SdoState::Idle),
            _ => abort(out, 0, 0, AbortCode::InvalidCommandSpecifier),
        }
    }

    fn download_segment(
        &mut self,
        t: Transfer,
        req: SdoRequest,
        out: &mut [u8],
    ) -> (Option<usize>, SdoState) {
        let index = t.entry.index;
        match req {
            SdoRequest::DownloadSegment { toggle, last, data } => {
                if toggle != t.toggle {
                    t.entry.data.abort_write(t.sub);
                    return abort(out, index, t.sub, AbortCode::ToggleNotAlternated);
                }
                if let Err(code) = t.entry.data.write_chunk(t.sub, t.offset, data) {
                    t.entry.data.abort_write(t.sub);
                    return abort(out, index, t.sub, code);
                }
                if last {
                    if let Err(code) = t.entry.data.end_write(t.sub) {
                        return abort(out, index, t.sub, code);
                    }
                    debug!("SDO download {:#06x}:{} complete", index, t.sub);
                    reply(
                        out,
                        SdoResponse::DownloadSegmentAck { toggle },
                        SdoState::Idle,
                    )
                } else {
                    reply(
                        out,
                        SdoResponse::DownloadSegmentAck { toggle },
                        SdoState::Download(Transfer {
                            toggle: !t.toggle,
                            offset: t.offset + data.len(),
                            ..t
                        }),
                    )
                }
            }
            SdoRequest::Abort { .. } => {
                t.entry.data.abort_write(t.sub);
                (None, SdoState::Idle)
            }
            _ => {
                t.entry.data.abort_write(t.sub);
                abort(out, index, t.sub, AbortCode::InvalidCommandSpecifier)
            }
        }
    }

    fn upload_segment(
        &mut self,
        t: Transfer,
        req: SdoRequest,
        out: &mut [u8],
    ) -> (Option<usize>, SdoState) {
        let index = t.entry.index;
        match req {
            SdoRequest::UploadSegment { toggle } => {
                if toggle != t.toggle {
                    return abort(out, index, t.sub, AbortCode::ToggleNotAlternated);
                }
                let total = t.total.unwrap_or(0);
                let n = (total - t.offset).min(self.segment_capacity());
                let mut buf = [0u8; MAX_MAILBOX_SIZE];
                let n = match t.entry.data.read(t.sub, t.offset, &mut buf[..n]) {
                    Ok(n) => n,
                    Err(code) => return abort(out, index, t.sub, code),
                };
                let last = t.offset + n >= total;
                let next = if last {
                    SdoState::Idle
                } else {
                    SdoState::Upload(Transfer {
                        toggle: !t.toggle,
                        offset: t.offset + n,
                        ..t
                    })
                };
                reply(
                    out,
                    SdoResponse::UploadSegment {
                        toggle,
                        last,
                        data: &buf[..n],
                    },
                    next,
                )
            }
            SdoRequest::Abort { .. } => (None, SdoState::Idle),
            _ => abort(out, index, t.sub, AbortCode::InvalidCommandSpecifier),
        }
    }

    fn handle_info(
        &mut self,
        body: &[u8],
        od: &'static [OdEntry<'static>],
        out: &mut [u8],
    ) -> Result<usize, u16> {
        let (header, opdata) =
            SdoInfoHeader::parse(body).ok_or(mailbox_errors::INVALID_HEADER)?;
        match header.opcode {
            info_op::GET_OD_LIST_REQ => {
                if opdata.len() < 2 {
                    return Err(mailbox_errors::INVALID_SIZE);
                }
                let list_type = u16::from_le_bytes([opdata[0], opdata[1]]);
                if list_type > 5 {
                    return Ok(write_info_error(out, AbortCode::IncompatibleParameter));
                }
                if list_type == 0 {
                    return Ok(write_list_counts(od, out));
                }
                let progress = OdListProgress { list_type, next: 0 };
                Ok(self.write_od_list_fragment(od, progress, true, out))
            }
            info_op::GET_OBJ_DESC_REQ => {
                if opdata.len() < 2 {
                    return Err(mailbox_errors::INVALID_SIZE);
                }
                let index = u16::from_le_bytes([opdata[0], opdata[1]]);
                Ok(write_object_description(od, index, out))
            }
            info_op::GET_ENTRY_DESC_REQ => {
                if opdata.len() < 4 {
                    return Err(mailbox_errors::INVALID_SIZE);
                }
                let index = u16::from_le_bytes([opdata[0], opdata[1]]);
                Ok(write_entry_description(od, index, opdata[2], opdata[3], out))
            }
            _ => Ok(write_info_error(out, AbortCode::InvalidCommandSpecifier)),
        }
    }

    fn write_od_list_fragment(
        &mut self,
        od: &'static [OdEntry<'static>],
        progress: OdListProgress,
        first: bool,
        out: &mut [u8],
    ) -> usize {
        let total = list_len(od, progress.list_type);
        let cap = self
            .frame_capacity
            .saturating_sub(COE_HEADER_SIZE + SDO_INFO_HEADER_SIZE);
        // The first fragment also carries the echoed list type
        let per_frame = (if first { (cap - 2) / 2 } else { cap / 2 }).max(1);

        let count = (total - progress.next).min(per_frame);
        let remaining = total - progress.next - count;
        let fragments_left = remaining.div_ceil((cap / 2).max(1));

        CoeHeader::new(CoeService::SdoInfo).write(out);
        SdoInfoHeader {
            opcode: info_op::GET_OD_LIST_RESP,
            incomplete: fragments_left > 0,
            fragments_left: fragments_left as u16,
        }
        .write(&mut out[COE_HEADER_SIZE..]);

        let mut pos = COE_HEADER_SIZE + SDO_INFO_HEADER_SIZE;
        if first {
            out[pos..pos + 2].copy_from_slice(&progress.list_type.to_le_bytes());
            pos += 2;
        }
        for n in progress.next..progress.next + count {
            let index = list_index(od, progress.list_type, n);
            out[pos..pos + 2].copy_from_slice(&index.to_le_bytes());
            pos += 2;
        }

        self.od_list = if fragments_left > 0 {
            Some(OdListProgress {
                next: progress.next + count,
                ..progress
            })
        } else {
            None
        };
        pos
    }
}

fn reply(out: &mut [u8], response: SdoResponse, next: SdoState) -> (Option<usize>, SdoState) {
    (Some(write_response(out, response)), next)
}

fn abort(out: &mut [u8], index: u16, sub: u8, code: AbortCode) -> (Option<usize>, SdoState) {
    debug!("SDO abort {:#06x}:{}: {:?}", index, sub, code);
    (
        Some(write_response(out, SdoResponse::abort(index, sub, code))),
        SdoState::Idle,
    )
}

fn write_response(out: &mut [u8], response: SdoResponse) -> usize {
    response.write(out)
}

/// Is the entry's sub mappable into a PDO of the given direction?
fn mappable(object: &dyn ObjectAccess, sub: u8, rx: bool) -> bool {
    match object.sub_info(sub) {
        Ok(info) => {
            info.pdo_mappable
                && if rx {
                    info.access_type.is_writable()
                } else {
                    info.access_type.is_readable()
                }
        }
        Err(_) => false,
    }
}

fn in_list(entry: &OdEntry, list_type: u16) -> bool {
    match list_type {
        1 => true,
        2 => (0..=entry.data.max_sub_number()).any(|s| mappable(entry.data, s, true)),
        3 => (0..=entry.data.max_sub_number()).any(|s| mappable(entry.data, s, false)),
        // Backup and settings lists are not maintained by this stack
        _ => false,
    }
}

fn list_len(od: &[OdEntry], list_type: u16) -> usize {
    od.iter().filter(|e| in_list(e, list_type)).count()
}

fn list_index(od: &[OdEntry], list_type: u16, n: usize) -> u16 {
    od.iter()
        .filter(|e| in_list(e, list_type))
        .nth(n)
        .map(|e| e.index)
        .unwrap_or(0)
}

fn write_list_counts(od: &[OdEntry], out: &mut [u8]) -> usize {
    CoeHeader::new(CoeService::SdoInfo).write(out);
    SdoInfoHeader {
        opcode: info_op::GET_OD_LIST_RESP,
        incomplete: false,
        fragments_left: 0,
    }
    .write(&mut out[COE_HEADER_SIZE..]);
    let mut pos = COE_HEADER_SIZE + SDO_INFO_HEADER_SIZE;
    out[pos..pos + 2].copy_from_slice(&0u16.to_le_bytes());
    pos += 2;
    for list_type in 1..=5u16 {
        let count = list_len(od, list_type) as u16;
        out[pos..pos + 2].copy_from_slice(&count.to_le_bytes());
        pos += 2;
    }
    pos
}

fn write_info_error(out: &mut [u8], code: AbortCode) -> usize {
    CoeHeader::new(CoeService::SdoInfo).write(out);
    SdoInfoHeader {
        opcode: info_op::ERROR,
        incomplete: false,
        fragments_left: 0,
    }
    .write(&mut out[COE_HEADER_SIZE..]);
    let pos = COE_HEADER_SIZE + SDO_INFO_HEADER_SIZE;
    out[pos..pos + 4].copy_from_slice(&u32::from(code).to_le_bytes());
    pos + 4
}

fn write_object_description(od: &[OdEntry], index: u16, out: &mut [u8]) -> usize {
    let Some(entry) = find_object_entry(od, index) else {
        return write_info_error(out, AbortCode::NoSuchObject);
    };
    // The description always fits one frame because names are not stored;
    // a fragmented description is a known limitation of this server.
    let data_type: u16 = match entry.data.object_code() {
        ObjectCode::Var => entry.data.sub_info(0).map(|i| i.data_type.into()).unwrap_or(0),
        ObjectCode::Array => entry.data.sub_info(1).map(|i| i.data_type.into()).unwrap_or(0),
        ObjectCode::Record => 0,
    };
    CoeHeader::new(CoeService::SdoInfo).write(out);
    SdoInfoHeader {
        opcode: info_op::GET_OBJ_DESC_RESP,
        incomplete: false,
        fragments_left: 0,
    }
    .write(&mut out[COE_HEADER_SIZE..]);
    let pos = COE_HEADER_SIZE + SDO_INFO_HEADER_SIZE;
    out[pos..pos + 2].copy_from_slice(&index.to_le_bytes());
    out[pos + 2..pos + 4].copy_from_slice(&data_type.to_le_bytes());
    out[pos + 4] = entry.data.max_sub_number();
    out[pos + 5] = entry.data.object_code() as u8;
    pos + 6
}

fn write_entry_description(
    od: &[OdEntry],
    index: u16,
    sub: u8,
    value_info: u8,
    out: &mut [u8],
) -> usize {
    let Some(entry) = find_object_entry(od, index) else {
        return write_info_error(out, AbortCode::NoSuchObject);
    };
    let info = match entry.data.sub_info(sub) {
        Ok(info) => info,
        Err(code) => return write_info_error(out, code),
    };

    let mut access: u16 = 0;
    if info.access_type.is_readable() {
        access |= 0x0007;
    }
    if info.access_type.is_writable() {
        access |= 0x0038;
    }
    if info.pdo_mappable && info.access_type.is_writable() {
        access |= 0x0040;
    }
    if info.pdo_mappable && info.access_type.is_readable() {
        access |= 0x0080;
    }

    CoeHeader::new(CoeService::SdoInfo).write(out);
    SdoInfoHeader {
        opcode: info_op::GET_ENTRY_DESC_RESP,
        incomplete: false,
        fragments_left: 0,
    }
    .write(&mut out[COE_HEADER_SIZE..]);
    let pos = COE_HEADER_SIZE + SDO_INFO_HEADER_SIZE;
    out[pos..pos + 2].copy_from_slice(&index.to_le_bytes());
    out[pos + 2] = sub;
    out[pos + 3] = value_info;
    let data_type: u16 = info.data_type.into();
    out[pos + 4..pos + 6].copy_from_slice(&data_type.to_le_bytes());
    out[pos + 6..pos + 8].copy_from_slice(&((info.size * 8) as u16).to_le_bytes());
    out[pos + 8..pos + 10].copy_from_slice(&access.to_le_bytes());
    pos + 10
}
