use utf8::Incomplete;

// Feeds `input` into the incremental validator. Returns false as soon as an invalid sequence is
// found. A sequence cut at the end of `input` stays buffered in `state`.
pub(super) fn process_utf8(state: &mut Incomplete, input: &[u8]) -> bool {
    for byte in input {
        if let Some((Err(_), _)) = state.try_complete(std::slice::from_ref(byte)) {
            return false;
        }
    }
    true
}
