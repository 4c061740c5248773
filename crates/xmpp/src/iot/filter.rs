use crate::{filter::StanzaFilter, stanza::Stanza};

use super::element::{FieldsExtension, NAMESPACE, bool_attr, seq_nr_attr};

/// Matches messages carrying a `<fields/>` extension for one read-out.
///
/// `done` selects between interim batches (`false`) and the terminal one
/// (`true`), so a data collector and a done collector for the same sequence
/// number never both accept a stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldsFilter {
    seq_nr: u64,
    done: bool,
}

impl FieldsFilter {
    pub fn new(seq_nr: u64, done: bool) -> Self {
        Self { seq_nr, done }
    }
}

impl StanzaFilter for FieldsFilter {
    fn accept(&self, stanza: &Stanza) -> bool {
        if stanza.message_type().is_none() {
            return false;
        }
        let Some(fields) = stanza.child(FieldsExtension::ELEMENT, NAMESPACE) else {
            return false;
        };

        seq_nr_attr(fields, "fields").is_ok_and(|seq_nr| seq_nr == self.seq_nr)
            && bool_attr(fields, "fields", "done").is_ok_and(|done| done == self.done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields_message(seq_nr: &str, done: Option<&str>) -> Stanza {
        let done = done.map(|d| format!(" done='{d}'")).unwrap_or_default();
        Stanza::parse(
            format!(
                "<message xmlns='jabber:client'>\
                 <fields xmlns='urn:xmpp:iot:sensordata' seqnr='{seq_nr}'{done}/></message>"
            )
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn separates_interim_from_terminal_batches() {
        let data = FieldsFilter::new(7, false);
        let done = FieldsFilter::new(7, true);

        let interim = fields_message("7", None);
        let explicit_interim = fields_message("7", Some("false"));
        let terminal = fields_message("7", Some("true"));

        assert!(data.accept(&interim));
        assert!(data.accept(&explicit_interim));
        assert!(!data.accept(&terminal));
        assert!(done.accept(&terminal));
        assert!(!done.accept(&interim));
    }

    #[test]
    fn ignores_other_sequence_numbers_and_garbage() {
        let filter = FieldsFilter::new(7, true);

        assert!(!filter.accept(&fields_message("8", Some("true"))));
        assert!(!filter.accept(&fields_message("seven", Some("true"))));
        assert!(!filter.accept(&fields_message("7", Some("maybe"))));
        assert!(
            !filter.accept(
                &Stanza::parse(
                    b"<iq xmlns='jabber:client' type='result' id='a'>\
                      <fields xmlns='urn:xmpp:iot:sensordata' seqnr='7' done='true'/></iq>"
                )
                .unwrap()
            )
        );
    }
}
