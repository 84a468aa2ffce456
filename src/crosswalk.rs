use crate::jper::Notification;

/// Maps a notification's metadata into the Atom entry body a SWORDv2
/// `create` / metadata deposit call expects. The exact RIOXX/DC mapping
/// rules are out of scope here (§1) — this is the collaborator boundary the
/// notification processor depends on, with one minimal default
/// implementation.
pub trait Crosswalk: Send + Sync {
    fn to_atom_entry(&self, note: &Notification) -> String;
}

/// Minimal RIOXX-flavoured mapping: wraps whatever the notification carries
/// as metadata plus its identifiers into a bare Atom entry. Good enough to
/// exercise the deposit sequence end to end; a production crosswalk would
/// replace this with the full DC/RIOXX field mapping (`xwalk.to_dc_rioxx`).
pub struct DefaultCrosswalk;

impl Crosswalk for DefaultCrosswalk {
    fn to_atom_entry(&self, note: &Notification) -> String {
        let mut ids = String::new();
        for identifier in &note.identifiers {
            ids.push_str(&format!(
                "<dcterms:identifier xsi:type=\"{}\">{}</dcterms:identifier>",
                escape(&identifier.kind),
                escape(&identifier.id)
            ));
        }

        let metadata = if note.metadata.is_null() {
            String::new()
        } else {
            format!(
                "<rioxxterms:metadata>{}</rioxxterms:metadata>",
                escape(&note.metadata.to_string())
            )
        };

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<entry xmlns=\"http://www.w3.org/2005/Atom\" xmlns:dcterms=\"http://purl.org/dc/terms/\" xmlns:rioxxterms=\"http://docs.rioxx.net/schema/v2.0/rioxxterms/\">\n<id>{}</id>\n{ids}{metadata}\n</entry>",
            escape(&note.id)
        )
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
