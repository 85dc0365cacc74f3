use mmq_protocol::HEADER_LEN;

use crate::{bitstream::LoaderPhase, error::DispatchError};

/// Capacity of the frame buffer. Larger than any frame the board executes.
pub const FRAME_CAPACITY: usize = 64;

/// Per-connection decoder state: the partially received frame and the progress of a
/// bitstream transfer.
#[derive(Debug, Clone)]
pub struct Session {
    frame: [u8; FRAME_CAPACITY],
    len: usize,
    loader: LoaderPhase,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            frame: [0; FRAME_CAPACITY],
            len: 0,
            loader: LoaderPhase::Idle,
        }
    }
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    /// The bytes buffered so far.
    pub fn frame(&self) -> &[u8] {
        &self.frame[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Progress of the bitstream transfer owned by this session.
    pub fn loader(&self) -> LoaderPhase {
        self.loader
    }

    pub(crate) fn push(&mut self, byte: u8) -> Result<(), DispatchError> {
        if self.len == FRAME_CAPACITY {
            return Err(DispatchError::FrameOverflow);
        }
        self.frame[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    pub(crate) fn split_mut(&mut self) -> (&[u8], &mut LoaderPhase) {
        (&self.frame[..self.len], &mut self.loader)
    }

    /// Rewinds the buffer after a consumed frame.
    ///
    /// While a bitstream transfer is in progress the `[opcode, device]` header stays
    /// buffered so that the following payload-only frames are attributed to the
    /// transfer. A finished transfer returns the loader to idle.
    pub fn finish_frame(&mut self) {
        if self.loader.in_progress() {
            self.len = HEADER_LEN;
        } else {
            self.len = 0;
            self.loader = LoaderPhase::Idle;
        }
    }

    /// Drops the buffered frame and any transfer in progress.
    pub fn abandon(&mut self) {
        if self.loader.in_progress() {
            log::warn!("Abandoning bitstream transfer ({:?})", self.loader);
        }
        self.len = 0;
        self.loader = LoaderPhase::Idle;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finish_frame_clears_when_idle() {
        let mut session = Session::new();
        session.push(0x0).unwrap();
        session.push(0x1).unwrap();
        session.finish_frame();
        assert!(session.is_empty());
    }

    #[test]
    fn finish_frame_retains_header_during_transfer() {
        let mut session = Session::new();
        for b in [0x5, 0x2, 64, 0, 0, 0] {
            session.push(b).unwrap();
        }
        *session.split_mut().1 = LoaderPhase::HeaderReceived { remaining: 64 };
        session.finish_frame();
        assert_eq!(session.frame(), &[0x5, 0x2]);

        session.abandon();
        assert!(session.is_empty());
        assert_eq!(session.loader(), LoaderPhase::Idle);
    }

    #[test]
    fn complete_transfer_returns_to_idle() {
        let mut session = Session::new();
        session.push(0x5).unwrap();
        *session.split_mut().1 = LoaderPhase::Complete { success: true };
        session.finish_frame();
        assert!(session.is_empty());
        assert_eq!(session.loader(), LoaderPhase::Idle);
    }

    #[test]
    fn overflow_is_reported() {
        let mut session = Session::new();
        for _ in 0..FRAME_CAPACITY {
            session.push(0xff).unwrap();
        }
        assert!(matches!(session.push(0xff), Err(DispatchError::FrameOverflow)));
    }
}
