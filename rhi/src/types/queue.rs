//! Hardware queue identities.

use super::PipelineStages;

/// One of the hardware queues a device may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueId {
    Graphics,
    Compute,
    Transfer,
}

impl QueueId {
    /// All queue identities in index order.
    pub const ALL: [QueueId; 3] = [QueueId::Graphics, QueueId::Compute, QueueId::Transfer];

    /// Dense index for per-queue arrays.
    pub fn index(&self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Transfer => 2,
        }
    }

    /// Stages a completion semaphore signalled by this queue is waited at.
    pub fn completion_stages(&self) -> PipelineStages {
        match self {
            Self::Graphics => PipelineStages::ALL_GRAPHICS,
            Self::Compute => PipelineStages::COMPUTE_SHADER,
            Self::Transfer => PipelineStages::TRANSFER,
        }
    }

    /// Stages that may appear in a wait mask submitted to this queue.
    pub fn supported_stages(&self) -> PipelineStages {
        let common = PipelineStages::TOP_OF_PIPE
            | PipelineStages::TRANSFER
            | PipelineStages::BOTTOM_OF_PIPE
            | PipelineStages::HOST
            | PipelineStages::ALL_COMMANDS;
        match self {
            Self::Graphics => PipelineStages::all(),
            Self::Compute => {
                common | PipelineStages::DRAW_INDIRECT | PipelineStages::COMPUTE_SHADER
            }
            Self::Transfer => common,
        }
    }

    /// Wait stage mask to use when this queue waits on a semaphore with `stages`.
    ///
    /// Stages the queue cannot execute are dropped; an empty result widens to
    /// `ALL_COMMANDS`.
    pub fn wait_stages(&self, stages: PipelineStages) -> PipelineStages {
        let masked = stages & self.supported_stages();
        if masked.is_empty() {
            PipelineStages::ALL_COMMANDS
        } else {
            masked
        }
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_stages() {
        assert_eq!(
            QueueId::Graphics.completion_stages(),
            PipelineStages::ALL_GRAPHICS
        );
        assert_eq!(
            QueueId::Compute.completion_stages(),
            PipelineStages::COMPUTE_SHADER
        );
        assert_eq!(
            QueueId::Transfer.completion_stages(),
            PipelineStages::TRANSFER
        );
    }

    #[test]
    fn test_wait_stages_are_masked() {
        assert_eq!(
            QueueId::Graphics.wait_stages(PipelineStages::TRANSFER),
            PipelineStages::TRANSFER
        );
        assert_eq!(
            QueueId::Compute.wait_stages(PipelineStages::ALL_GRAPHICS),
            PipelineStages::ALL_COMMANDS
        );
        assert_eq!(
            QueueId::Transfer.wait_stages(PipelineStages::COMPUTE_SHADER),
            PipelineStages::ALL_COMMANDS
        );
    }

    #[test]
    fn test_indices_are_dense() {
        for (i, queue) in QueueId::ALL.iter().enumerate() {
            assert_eq!(queue.index(), i);
        }
    }
}
