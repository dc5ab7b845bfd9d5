//! The eight pipeline stages (SPEC_FULL.md §4.2), each a standalone async
//! function the Orchestrator sequences and checkpoints.

pub mod a_normalize;
pub mod b_moderate_input;
pub mod c_story;
pub mod d_character;
pub mod e_prompts;
pub mod f_images;
pub mod g_moderate_output;
pub mod h_package;
