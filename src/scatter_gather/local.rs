use std::{
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use log::debug;

use super::{
    message::{ShardReply, ShardRequest},
    shard::Shard,
    Transport,
};
use crate::{
    error::{Error, Result},
    strategy::StrategyKind,
};

/// Shards running on threads of this process, each with a private inbox.
///
/// All shards answer on one shared reply channel.
#[derive(Debug)]
pub struct LocalShards {
    inboxes: Vec<Sender<ShardRequest>>,
    replies: Receiver<ShardReply>,
    threads: Vec<JoinHandle<()>>,
}

impl LocalShards {
    #[must_use]
    pub fn spawn(num_shards: usize) -> Self {
        let (reply_tx, replies) = mpsc::channel();

        let (inboxes, threads) = (0..num_shards.max(1))
            .map(|id| {
                let (tx, inbox) = mpsc::channel::<ShardRequest>();
                let reply_tx = reply_tx.clone();
                let thread = thread::spawn(move || {
                    let shard = Shard;
                    for request in inbox {
                        if reply_tx.send(shard.handle(request)).is_err() {
                            break;
                        }
                    }
                    debug!("shard {id} stopped");
                });
                (tx, thread)
            })
            .unzip();

        Self {
            inboxes,
            replies,
            threads,
        }
    }
}

impl Transport for LocalShards {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ScatterGather
    }

    fn shards(&self) -> usize {
        self.inboxes.len()
    }

    fn send(&mut self, shard: usize, request: ShardRequest) -> Result<()> {
        self.inboxes
            .get(shard)
            .ok_or(Error::ShardDisconnected(shard))?
            .send(request)
            .map_err(|_| Error::ShardDisconnected(shard))
    }

    fn recv(&mut self) -> Result<ShardReply> {
        self.replies
            .recv()
            .map_err(|_| Error::Protocol("every shard has stopped".into()))
    }
}

impl Drop for LocalShards {
    fn drop(&mut self) {
        // closing the inboxes ends the shard loops
        self.inboxes.clear();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyBounds;

    #[test]
    fn fan_in() {
        let mut shards = LocalShards::spawn(4);
        assert_eq!(shards.shards(), 4);

        for shard in 0..4 {
            shards
                .send(
                    shard,
                    ShardRequest::CreateBodies {
                        tick: 7,
                        from: shard * 3,
                        count: 3,
                        bounds: BodyBounds::default(),
                    },
                )
                .unwrap();
        }

        let mut starts: Vec<usize> = (0..4)
            .map(|_| match shards.recv().unwrap() {
                ShardReply::BodiesCreated { tick: 7, from, bodies } if bodies.len() == 3 => from,
                reply => panic!("unexpected reply {reply:?}"),
            })
            .collect();
        starts.sort_unstable();
        assert_eq!(starts, vec![0, 3, 6, 9]);
    }

    #[test]
    fn unknown_shard() {
        let mut shards = LocalShards::spawn(2);
        let request = ShardRequest::ComputeForces {
            tick: 0,
            from: 0,
            count: 0,
            bodies: Vec::new(),
        };
        assert!(matches!(shards.send(2, request), Err(Error::ShardDisconnected(2))));
    }
}
