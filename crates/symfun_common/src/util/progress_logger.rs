pub trait ProgressLogger {
    type Session: ProgressSession;
    fn start_session(self, total_count: Option<usize>) -> Self::Session;
}

pub trait ProgressSession {
    fn update(&mut self, progress: usize);
    fn finish(self);
}

/// A session that may or may not be displayed, chosen at runtime.
#[derive(Clone, Debug)]
pub enum MaybeSession<S> {
    Active(S),
    Inactive,
}

impl<T: ProgressLogger> ProgressLogger for Option<T> {
    type Session = MaybeSession<T::Session>;

    fn start_session(self, total_count: Option<usize>) -> Self::Session {
        match self {
            Some(logger) => MaybeSession::Active(logger.start_session(total_count)),
            None => MaybeSession::Inactive,
        }
    }
}

impl<S: ProgressSession> ProgressSession for MaybeSession<S> {
    fn update(&mut self, progress: usize) {
        if let MaybeSession::Active(session) = self {
            session.update(progress);
        }
    }

    fn finish(self) {
        if let MaybeSession::Active(session) = self {
            session.finish();
        }
    }
}
