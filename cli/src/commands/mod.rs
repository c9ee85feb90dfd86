mod helpers;
mod records;
mod snap;

pub(crate) use helpers::parse_record_id;
pub(crate) use records::{RecordEdit, cmd_delete, cmd_edit, cmd_image, cmd_list, cmd_show};
pub(crate) use snap::cmd_snap;
