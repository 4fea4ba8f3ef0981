use crossbeam::channel::{bounded, Receiver, Sender};
use pimexec_error::{PimexecError, Result};

/// One thread's ends of the prefix-count handshake chain.
///
/// Thread `t` receives the running survivor count from thread `t-1` and
/// forwards its updated count to thread `t+1`. Each link is a bounded
/// single-slot channel, so a token is written once per pass and consumed
/// exactly once.
#[derive(Debug)]
pub struct HandshakeLink {
    prev: Option<Receiver<usize>>,
    next: Option<Sender<usize>>,
}

impl HandshakeLink {
    /// Block until the lower-indexed thread posts its running count.
    ///
    /// The first thread in the chain always starts at zero.
    pub fn wait_prefix(&self) -> Result<usize> {
        match &self.prev {
            Some(recv) => recv
                .recv()
                .map_err(|_| PimexecError::new("Handshake predecessor disconnected")),
            None => Ok(0),
        }
    }

    /// Post the running count for the next-indexed thread to consume.
    ///
    /// No-op for the last thread in the chain.
    pub fn post_prefix(&self, count: usize) -> Result<()> {
        match &self.next {
            Some(send) => send
                .send(count)
                .map_err(|_| PimexecError::new("Handshake successor disconnected")),
            None => Ok(()),
        }
    }
}

/// Build the handshake chain for `thread_count` threads, one link per thread.
pub fn handshake_links(thread_count: usize) -> Vec<HandshakeLink> {
    let mut links: Vec<HandshakeLink> = (0..thread_count)
        .map(|_| HandshakeLink {
            prev: None,
            next: None,
        })
        .collect();

    for idx in 0..thread_count.saturating_sub(1) {
        let (send, recv) = bounded(1);
        links[idx].next = Some(send);
        links[idx + 1].prev = Some(recv);
    }

    links
}
