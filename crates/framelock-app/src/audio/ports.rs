/// One wire from a renderer output channel to a physical playback input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConnection {
    /// Flattened output channel index, in declaration order.
    pub output: usize,
    /// Physical playback input index.
    pub input: usize,
}

/// Decide how output channels connect to physical inputs.
///
/// A single output with more than one physical input fans out to the first two
/// inputs (mono to stereo). Otherwise outputs connect one-to-one in declaration
/// order, as far as there are inputs to take them.
pub fn plan_connections(outputs: usize, physical_inputs: usize) -> Vec<PortConnection> {
    if outputs == 1 && physical_inputs > 1 {
        return vec![
            PortConnection { output: 0, input: 0 },
            PortConnection { output: 0, input: 1 },
        ];
    }
    (0..outputs.min(physical_inputs))
        .map(|i| PortConnection { output: i, input: i })
        .collect()
}
