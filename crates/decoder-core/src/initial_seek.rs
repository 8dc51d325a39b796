//! Positioning a song at its start offset before any audio is emitted.

/// Progress of the seek to the song's start time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialSeekState {
    /// The song starts at the beginning of the file.
    Idle,
    /// A start offset is set but the plugin has not been told yet.
    Pending,
    /// The plugin received a virtual SEEK and is executing it.
    Running,
    /// Done, or skipped because the stream cannot seek.
    Completed,
    /// The seek failed; decoding continues from the natural start.
    FailedNonEssential,
    /// The seek failed and the song must not be played.
    FailedEssential,
}

/// What to do after the plugin reported a failed initial seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekFailure {
    Ignored,
    Fatal,
}

#[derive(Debug)]
pub struct InitialSeek {
    state: InitialSeekState,
    essential: bool,
}

impl InitialSeek {
    /// `start_offset` is the song's start position; `false` means there is
    /// nothing to seek to.
    pub fn new(start_offset: bool, essential: bool) -> Self {
        Self {
            state: if start_offset {
                InitialSeekState::Pending
            } else {
                InitialSeekState::Idle
            },
            essential,
        }
    }

    pub fn state(&self) -> InitialSeekState {
        self.state
    }

    pub fn is_essential(&self) -> bool {
        self.essential
    }

    pub fn is_pending(&self) -> bool {
        self.state == InitialSeekState::Pending
    }

    pub fn is_running(&self) -> bool {
        self.state == InitialSeekState::Running
    }

    /// Decide whether the plugin should see a virtual SEEK now.
    ///
    /// A pending seek starts when the stream is seekable and the controller
    /// has nothing queued; otherwise it is dropped for good.
    pub fn poll(&mut self, seekable: bool, real_command_pending: bool) -> bool {
        match self.state {
            InitialSeekState::Running => true,
            InitialSeekState::Pending if seekable && !real_command_pending => {
                self.state = InitialSeekState::Running;
                true
            }
            InitialSeekState::Pending => {
                tracing::debug!(seekable, real_command_pending, "initial seek skipped");
                self.state = InitialSeekState::Completed;
                false
            }
            _ => false,
        }
    }

    /// The plugin acknowledged the virtual SEEK.
    pub fn finish(&mut self) {
        debug_assert!(self.is_running());
        self.state = InitialSeekState::Completed;
    }

    /// The plugin reported a seek error for the virtual SEEK.
    pub fn fail(&mut self) -> SeekFailure {
        debug_assert!(self.is_running());
        if self.essential {
            self.state = InitialSeekState::FailedEssential;
            SeekFailure::Fatal
        } else {
            self.state = InitialSeekState::FailedNonEssential;
            SeekFailure::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_offset_never_seeks() {
        let mut s = InitialSeek::new(false, true);
        assert_eq!(s.state(), InitialSeekState::Idle);
        assert!(!s.poll(true, false));
        assert_eq!(s.state(), InitialSeekState::Idle);
    }

    #[test]
    fn pending_runs_until_finished() {
        let mut s = InitialSeek::new(true, false);
        assert!(s.poll(true, false));
        assert!(s.is_running());
        // Stays running across polls, even with a real command queued.
        assert!(s.poll(true, true));
        s.finish();
        assert_eq!(s.state(), InitialSeekState::Completed);
        assert!(!s.poll(true, false));
    }

    #[test]
    fn unseekable_stream_skips() {
        let mut s = InitialSeek::new(true, true);
        assert!(!s.poll(false, false));
        assert_eq!(s.state(), InitialSeekState::Completed);
    }

    #[test]
    fn real_command_skips() {
        let mut s = InitialSeek::new(true, false);
        assert!(!s.poll(true, true));
        assert_eq!(s.state(), InitialSeekState::Completed);
    }

    #[test]
    fn failure_depends_on_essential() {
        let mut s = InitialSeek::new(true, true);
        s.poll(true, false);
        assert_eq!(s.fail(), SeekFailure::Fatal);
        assert_eq!(s.state(), InitialSeekState::FailedEssential);

        let mut s = InitialSeek::new(true, false);
        s.poll(true, false);
        assert_eq!(s.fail(), SeekFailure::Ignored);
        assert_eq!(s.state(), InitialSeekState::FailedNonEssential);
        assert!(!s.poll(true, false));
    }
}
