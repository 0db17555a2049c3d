//! Container image references and the rules that rewrite them

mod mapping;
mod reference;

pub use mapping::{
    find_rule, generated_tag, generated_tag_now, ImageMappingRule, ImagePush, MatchContext,
    Override, TagType,
};
pub use reference::ImageRef;
