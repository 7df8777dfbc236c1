use std_alloc::string::String;

use loam_msg::Message;

pub(crate) fn msg_summary(msg: &Message) -> String {
  std_alloc::format!("{:?}: {:?} {} with {} byte payload",
                     msg.code.kind(),
                     msg.ty,
                     String::from_iter(msg.code.to_human()),
                     msg.payload.len())
}
