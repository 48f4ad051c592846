use crate::frame::{NativeMemory, NativeRegion};
use crate::message::{WsMessageType, WsReceiveResult};
use crate::session::WsError;
use std::ops::Range;

enum PinSlot {
    Free,
    Pinned(Vec<u8>),
}

struct Spill {
    data: Vec<u8>,
    message_type: WsMessageType,
    end_of_message: bool,
    read_offset: usize,
}

impl Spill {
    fn remaining(&self) -> usize {
        self.data.len() - self.read_offset
    }
}

/// Memory shared between a session and its frame engine.
///
/// The internal region is addressed as one space: `0..receive_size` is the receive area and
/// `receive_size..receive_size + send_size` is the send area. The receive area is checked out
/// while a network read fills it, so the session lock does not have to be held across the read.
pub(crate) struct BufferManager {
    receive_size: usize,
    send_size: usize,
    receive_area: Option<Vec<u8>>,
    send_area: Vec<u8>,
    pinned: PinSlot,
    spill: Option<Spill>,
    disposed: bool,
}

impl BufferManager {
    pub fn new(receive_size: usize, send_size: usize) -> Self {
        Self {
            receive_size,
            send_size,
            receive_area: Some(vec![0u8; receive_size]),
            send_area: vec![0u8; send_size],
            pinned: PinSlot::Free,
            spill: None,
            disposed: false,
        }
    }

    /// Copies the caller payload into the pinned slot and returns the region naming it.
    pub fn pin_send(&mut self, payload: &[u8]) -> Result<NativeRegion, WsError> {
        if self.disposed {
            return Err(WsError::Disposed);
        }
        if self.is_pinned() {
            return Err(WsError::AlreadyPinned);
        }
        self.pinned = PinSlot::Pinned(payload.to_vec());
        Ok(NativeRegion::PinnedSend(0..payload.len()))
    }

    pub fn release_send(&mut self) {
        self.pinned = PinSlot::Free;
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self.pinned, PinSlot::Pinned(_))
    }

    pub fn has_spill(&self) -> bool {
        self.spill.is_some()
    }

    /// Keeps `payload[consumed..]` for the following receives.
    pub fn spill(
        &mut self,
        payload: &[u8],
        consumed: usize,
        message_type: WsMessageType,
        end_of_message: bool,
    ) {
        self.spill = Some(Spill {
            data: payload[consumed..].to_vec(),
            message_type,
            end_of_message,
            read_offset: 0,
        });
    }

    /// Serves a receive from previously spilled payload. `None` if nothing is spilled.
    pub fn drain_into(&mut self, buffer: &mut [u8]) -> Option<WsReceiveResult> {
        let spill = self.spill.as_mut()?;
        let count = buffer.len().min(spill.remaining());
        buffer[..count].copy_from_slice(&spill.data[spill.read_offset..spill.read_offset + count]);
        spill.read_offset += count;
        let message_type = spill.message_type;
        let drained = spill.remaining() == 0;
        let end_of_message = spill.end_of_message && drained;
        if drained {
            self.spill = None;
        }
        Some(WsReceiveResult {
            count,
            message_type,
            end_of_message,
        })
    }

    /// Hands an indicated payload to the caller. What does not fit is spilled for the following
    /// receives, and the end-of-message flag is only reported with the final byte.
    pub fn deliver(
        &mut self,
        region: &NativeRegion,
        buffer: &mut [u8],
        message_type: WsMessageType,
        end_of_message: bool,
    ) -> Result<WsReceiveResult, WsError> {
        if self.has_spill() {
            return Err(WsError::InvalidRegion(region.clone()));
        }
        let payload = self.region(region)?;
        let count = buffer.len().min(payload.len());
        buffer[..count].copy_from_slice(&payload[..count]);
        if count == payload.len() {
            return Ok(WsReceiveResult {
                count,
                message_type,
                end_of_message,
            });
        }
        let rest = payload[count..].to_vec();
        self.spill(&rest, 0, message_type, end_of_message);
        Ok(WsReceiveResult {
            count,
            message_type,
            end_of_message: false,
        })
    }

    /// Whether `region` lies entirely within memory this manager owns.
    pub fn is_native(&self, region: &NativeRegion) -> bool {
        if self.disposed {
            return false;
        }
        match region {
            NativeRegion::Internal(range) => {
                range.start <= range.end
                    && (range.end <= self.receive_size
                        || (range.start >= self.receive_size
                            && range.end <= self.receive_size + self.send_size))
            }
            NativeRegion::PinnedSend(range) => match &self.pinned {
                PinSlot::Pinned(payload) => range.start <= range.end && range.end <= payload.len(),
                PinSlot::Free => false,
            },
            NativeRegion::Foreign => false,
        }
    }

    /// Bytes behind a native region.
    pub fn region(&self, region: &NativeRegion) -> Result<&[u8], WsError> {
        if !self.is_native(region) {
            return Err(WsError::InvalidRegion(region.clone()));
        }
        let unavailable = || WsError::InvalidRegion(region.clone());
        match region {
            NativeRegion::Internal(range) if range.start >= self.receive_size && !range.is_empty() => {
                let base = self.receive_size;
                Ok(&self.send_area[range.start - base..range.end - base])
            }
            NativeRegion::Internal(range) => self
                .receive_area
                .as_deref()
                .map(|area| &area[range.clone()])
                .ok_or_else(unavailable),
            NativeRegion::PinnedSend(range) => match &self.pinned {
                PinSlot::Pinned(payload) => Ok(&payload[range.clone()]),
                PinSlot::Free => Err(unavailable()),
            },
            NativeRegion::Foreign => Err(unavailable()),
        }
    }

    /// Gathers the regions of one network write into a single buffer.
    pub fn copy_out(&self, regions: &[NativeRegion]) -> Result<Vec<u8>, WsError> {
        let mut total = 0;
        for region in regions {
            if !self.is_native(region) {
                return Err(WsError::InvalidRegion(region.clone()));
            }
            total += region.len();
        }
        let mut data = Vec::with_capacity(total);
        for region in regions {
            data.extend_from_slice(self.region(region)?);
        }
        Ok(data)
    }

    /// Takes the receive area out for a network read into `region`.
    pub fn checkout_receive(
        &mut self,
        region: &NativeRegion,
    ) -> Result<(Vec<u8>, Range<usize>), WsError> {
        let range = match region {
            NativeRegion::Internal(range)
                if self.is_native(region) && range.end <= self.receive_size && !range.is_empty() =>
            {
                range.clone()
            }
            other => return Err(WsError::InvalidRegion(other.clone())),
        };
        let area = self
            .receive_area
            .take()
            .ok_or_else(|| WsError::InvalidRegion(region.clone()))?;
        Ok((area, range))
    }

    pub fn restore_receive(&mut self, area: Vec<u8>) {
        if !self.disposed {
            self.receive_area = Some(area);
        }
    }

    pub fn native_memory(&mut self) -> NativeMemory<'_> {
        NativeMemory {
            receive: self.receive_area.as_deref_mut(),
            send: self.send_area.as_mut_slice(),
            pinned: match &mut self.pinned {
                PinSlot::Pinned(payload) => Some(payload.as_mut_slice()),
                PinSlot::Free => None,
            },
        }
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.receive_area = None;
        self.send_area = Vec::new();
        self.pinned = PinSlot::Free;
        self.spill = None;
    }
}
