use super::page::{PageHeader, NO_GRANULE};
use crate::{
    error::{DemuxError, Result},
    input::SeekableStream,
};
use tracing::{trace, warn};

/// A reassembled packet of one logical bitstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OggPacket {
    /// Packet contents.
    pub data: Vec<u8>,
    /// Granule of the last page on which a packet ended before this packet's page.
    ///
    /// For codecs whose packet durations are not known up front, this is the
    /// best available start position of the packet.
    pub start_granule: u64,
}

/// Reassembles the packets of a single bitstream from consecutive pages.
///
/// Packets may span any number of pages. Pages belonging to other
/// bitstreams (multiplexed or chained) are skipped.
#[derive(Debug)]
pub struct PacketReader {
    serial: Option<u32>,
    page: Option<PageHeader>,
    segment: usize,
    previous_granule: u64,
    current_granule: u64,
    resync: bool,
}

impl PacketReader {
    /// Create a reader which follows the first bitstream it encounters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            serial: None,
            page: None,
            segment: 0,
            previous_granule: 0,
            current_granule: 0,
            resync: false,
        }
    }

    /// Serial number of the followed bitstream, once a page has been read.
    #[must_use]
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    /// Whether the current page has no further segments.
    #[must_use]
    pub fn at_page_end(&self) -> bool {
        self.page
            .as_ref()
            .map_or(true, |page| self.segment >= page.segments.len())
    }

    /// Forget the current page, after the stream has been moved to the start of another.
    ///
    /// `granule` is the position of the audio which starts on that page. Any
    /// packet tail continued onto the new page is discarded.
    pub fn reset(&mut self, granule: u64) {
        self.page = None;
        self.segment = 0;
        self.previous_granule = granule;
        self.current_granule = granule;
        self.resync = true;
    }

    /// Reads the next complete packet, or `None` at the end of the bitstream.
    pub fn next_packet(&mut self, stream: &mut dyn SeekableStream) -> Result<Option<OggPacket>> {
        let mut data = Vec::new();
        let mut start_granule = None;

        loop {
            if self.at_page_end() {
                let mid_packet = start_granule.is_some();

                if self.page.as_ref().map_or(false, PageHeader::is_last) {
                    return if mid_packet {
                        Err(DemuxError::malformed("OGG stream ended mid-packet"))
                    } else {
                        Ok(None)
                    };
                }

                if !self.next_page(stream, mid_packet)? {
                    return if mid_packet {
                        Err(DemuxError::malformed("OGG stream ended mid-packet"))
                    } else {
                        Ok(None)
                    };
                }

                continue;
            }

            let page = match &self.page {
                Some(page) => page,
                None => continue,
            };

            let len = page.segments[self.segment];
            self.segment += 1;

            let granule = self.previous_granule;
            start_granule.get_or_insert(granule);

            let start = data.len();
            data.resize(start + usize::from(len), 0);
            stream.read_exact(&mut data[start..])?;

            if len < 255 {
                return Ok(Some(OggPacket {
                    data,
                    start_granule: start_granule.unwrap_or(granule),
                }));
            }
        }
    }

    /// Moves to the next page of the followed bitstream.
    ///
    /// Returns `false` if the stream ended cleanly.
    fn next_page(&mut self, stream: &mut dyn SeekableStream, mid_packet: bool) -> Result<bool> {
        loop {
            let page = match PageHeader::read(stream)? {
                Some(page) => page,
                None => return Ok(false),
            };

            let serial = *self.serial.get_or_insert(page.serial);
            if page.serial != serial {
                trace!("Skipping OGG page of bitstream {:08x}.", page.serial);
                stream.skip_fully(page.body_len())?;
                continue;
            }

            if self.current_granule != NO_GRANULE {
                self.previous_granule = self.current_granule;
            }
            self.current_granule = page.granule;
            self.segment = 0;

            if page.is_continued() && !mid_packet {
                if !self.resync {
                    warn!("OGG page continues a packet which was never started.");
                }
                self.skip_continued(stream, &page)?;
            } else if mid_packet && !page.is_continued() {
                return Err(DemuxError::malformed("OGG packet interrupted by a new page"));
            }

            self.resync = false;
            self.page = Some(page);

            return Ok(true);
        }
    }

    fn skip_continued(&mut self, stream: &mut dyn SeekableStream, page: &PageHeader) -> Result<()> {
        while let Some(&len) = page.segments.get(self.segment) {
            self.segment += 1;
            stream.skip_fully(u64::from(len))?;

            if len < 255 {
                break;
            }
        }

        Ok(())
    }
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new()
    }
}
