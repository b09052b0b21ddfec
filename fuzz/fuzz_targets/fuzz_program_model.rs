#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Loading and wiring a model must never panic.
        if let Ok(model) = mosaic_ir::ProgramModel::from_json(s) {
            if let Ok(graph) = model.block_graph() {
                for block in graph.blocks() {
                    let _ = graph.lies_on_cycle(block.id());
                }
            }
        }
    }
});
