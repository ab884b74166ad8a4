mod gate;
mod page;

pub use gate::draw_gate;
pub use page::draw_page;
