//! Page splitting: one single-page PDF per source page.
//!
//! ## Why copy only what the page reaches?
//!
//! A page is not self-contained: its fonts, images and content streams are
//! shared objects hanging off the page tree, and inheritable attributes
//! (`Resources`, `MediaBox`, `CropBox`, `Rotate`) may sit on an ancestor
//! `Pages` node. Each output starts from an empty document: the page
//! dictionary takes over the attributes it inherits, then every object
//! reachable from it is copied under its original id. References into the
//! rest of the page tree (other pages, `Parent` links) become `null`, so the
//! cost of one page depends on what that page uses, not on the size of the
//! source document.
//!
//! [`PageSource`] is the seam between the orchestrator and lopdf, so tests
//! (and future backends) can supply pages without a real document.

use crate::error::{PageError, SplitError};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Page attributes a page may inherit from its `Pages` ancestors.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Bound on the `Parent` chain walked for inherited attributes.
const MAX_TREE_DEPTH: usize = 64;

/// Anything that can hand out pages as standalone PDF documents.
///
/// `extract_page` must not depend on earlier calls: pages may be produced
/// in any order, or concurrently.
pub trait PageSource: Send + Sync {
    /// Number of pages in the source.
    fn page_count(&self) -> usize;

    /// Serialised single-page document for the page at 0-based `index`.
    fn extract_page(&self, index: usize) -> Result<Vec<u8>, PageError>;
}

/// A parsed source PDF.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    doc: Document,
    page_ids: Vec<ObjectId>,
    tree_nodes: HashSet<ObjectId>,
}

impl SourceDocument {
    /// Parse `bytes` as a PDF document.
    ///
    /// # Errors
    /// [`SplitError::CorruptPdf`] if lopdf cannot read the structure.
    pub fn load(bytes: &[u8], filename: &str) -> Result<Self, SplitError> {
        let doc = Document::load_mem(bytes).map_err(|e| SplitError::CorruptPdf {
            filename: filename.to_string(),
            detail: e.to_string(),
        })?;
        let source = Self::from_document(doc);
        debug!("Loaded '{}': {} pages", filename, source.page_count());
        Ok(source)
    }

    pub fn from_document(doc: Document) -> Self {
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let mut tree_nodes: HashSet<ObjectId> = doc
            .objects
            .iter()
            .filter(|(_, obj)| is_tree_node(obj))
            .map(|(&id, _)| id)
            .collect();
        tree_nodes.extend(page_ids.iter().copied());
        Self {
            doc,
            page_ids,
            tree_nodes,
        }
    }

    /// The page dictionary with inherited attributes filled in and no
    /// `Parent` link.
    fn flattened_page(&self, page_id: ObjectId) -> Result<Dictionary, lopdf::Error> {
        let mut page = self.doc.get_dictionary(page_id)?.clone();
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;

        while let Some(node_id) = parent {
            if depth == MAX_TREE_DEPTH {
                break;
            }
            let Ok(node) = self.doc.get_dictionary(node_id) else {
                break;
            };
            for key in INHERITABLE {
                if !page.has(key) {
                    if let Ok(value) = node.get(key) {
                        page.set(key, value.clone());
                    }
                }
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
            depth += 1;
        }

        page.remove(b"Parent");
        Ok(page)
    }

    /// Clone every object reachable from `root`, cutting references into the
    /// page tree other than `page_id` itself.
    fn reachable_objects(
        &self,
        root: &mut Object,
        page_id: ObjectId,
    ) -> BTreeMap<ObjectId, Object> {
        let cut = |id: ObjectId| id != page_id && self.tree_nodes.contains(&id);
        let mut pending = Vec::new();
        relink(root, &cut, &mut pending);

        let mut visited = HashSet::from([page_id]);
        let mut objects = BTreeMap::new();
        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            // Dangling references stay dangling; readers treat them as null.
            let Ok(obj) = self.doc.get_object(id) else {
                continue;
            };
            let mut obj = obj.clone();
            relink(&mut obj, &cut, &mut pending);
            objects.insert(id, obj);
        }
        objects
    }
}

impl PageSource for SourceDocument {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn extract_page(&self, index: usize) -> Result<Vec<u8>, PageError> {
        let page = index + 1;
        let failed = |detail: String| PageError::ExtractFailed { page, detail };
        let page_id = *self
            .page_ids
            .get(index)
            .ok_or_else(|| failed(format!("document has only {} pages", self.page_ids.len())))?;

        let mut page_obj = Object::Dictionary(
            self.flattened_page(page_id)
                .map_err(|e| failed(e.to_string()))?,
        );
        let objects = self.reachable_objects(&mut page_obj, page_id);

        let mut single = Document::with_version(self.doc.version.clone());
        single.objects = objects;
        single.max_id = self.doc.max_id;

        let pages_id = single.new_object_id();
        if let Object::Dictionary(dict) = &mut page_obj {
            dict.set("Parent", pages_id);
        }
        single.objects.insert(page_id, page_obj);
        single.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1_i64,
            }),
        );
        let catalog_id = single.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        single.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        single
            .save_to(&mut bytes)
            .map_err(|e| failed(e.to_string()))?;

        debug!("Extracted page {} ({} bytes)", page, bytes.len());
        Ok(bytes)
    }
}

fn is_tree_node(obj: &Object) -> bool {
    match obj
        .as_dict()
        .and_then(|d| d.get(b"Type"))
        .and_then(Object::as_name)
    {
        Ok(name) => name == b"Page" || name == b"Pages",
        Err(_) => false,
    }
}

/// Null out references for which `cut` holds; queue the others.
fn relink(obj: &mut Object, cut: &dyn Fn(ObjectId) -> bool, pending: &mut Vec<ObjectId>) {
    if let Object::Reference(id) = *obj {
        if cut(id) {
            *obj = Object::Null;
        } else {
            pending.push(id);
        }
        return;
    }
    match obj {
        Object::Array(items) => {
            for item in items.iter_mut() {
                relink(item, cut, pending);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                relink(value, cut, pending);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                relink(value, cut, pending);
            }
        }
        _ => {}
    }
}

/// One produced page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPage {
    /// 1-indexed page number in the source.
    pub ordinal: usize,
    /// Serialised single-page PDF.
    pub bytes: Vec<u8>,
}

/// Lazy, ordered, single-pass iterator over a source's pages.
///
/// Each `next()` does the work for one page. The iterator stops for good
/// after the first error.
pub struct SplitPages<'a, S: PageSource + ?Sized> {
    source: &'a S,
    next_index: usize,
    total: usize,
    failed: bool,
}

impl<S: PageSource + ?Sized> Iterator for SplitPages<'_, S> {
    type Item = Result<SplitPage, PageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_index >= self.total {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        match self.source.extract_page(index) {
            Ok(bytes) => Some(Ok(SplitPage {
                ordinal: index + 1,
                bytes,
            })),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.total - self.next_index))
        }
    }
}

impl<S: PageSource + ?Sized> std::iter::FusedIterator for SplitPages<'_, S> {}

/// Split `source` into single-page documents, in page order.
pub fn split<S: PageSource + ?Sized>(source: &S) -> SplitPages<'_, S> {
    SplitPages {
        source,
        next_index: 0,
        total: source.page_count(),
        failed: false,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory PDF fixtures: page N shows the text `Page N`.

    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    pub(crate) fn sample_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(pages);
        for n in 1..=pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Page {n}"))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    /// Page count and the decoded content of the first page.
    pub(crate) fn inspect(bytes: &[u8]) -> (usize, Vec<u8>) {
        let doc = Document::load_mem(bytes).unwrap();
        let pages = doc.get_pages();
        let content = pages
            .values()
            .next()
            .map(|&id| doc.get_page_content(id).unwrap())
            .unwrap_or_default();
        (pages.len(), content)
    }

    pub(crate) fn shows_page(bytes: &[u8], n: usize) -> bool {
        let (count, content) = inspect(bytes);
        let needle = format!("(Page {n})");
        count == 1
            && content
                .windows(needle.len())
                .any(|w| w == needle.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{sample_pdf, shows_page};
    use super::*;

    /// Source that fails at a chosen 1-indexed page.
    struct FailingSource {
        inner: SourceDocument,
        fail_at: usize,
    }

    impl PageSource for FailingSource {
        fn page_count(&self) -> usize {
            self.inner.page_count()
        }

        fn extract_page(&self, index: usize) -> Result<Vec<u8>, PageError> {
            if index + 1 == self.fail_at {
                return Err(PageError::ExtractFailed {
                    page: index + 1,
                    detail: "injected".into(),
                });
            }
            self.inner.extract_page(index)
        }
    }

    #[test]
    fn load_counts_pages() {
        let doc = SourceDocument::load(&sample_pdf(4), "four.pdf").unwrap();
        assert_eq!(doc.page_count(), 4);
    }

    #[test]
    fn load_rejects_garbage() {
        let err = SourceDocument::load(b"%PDF-1.5 this is not really a pdf", "bad.pdf").unwrap_err();
        assert!(matches!(err, SplitError::CorruptPdf { .. }));
        assert!(err.to_string().contains("bad.pdf"));
    }

    #[test]
    fn split_yields_each_page_in_order() {
        let doc = SourceDocument::load(&sample_pdf(3), "three.pdf").unwrap();
        let pages: Vec<SplitPage> = split(&doc).collect::<Result<_, _>>().unwrap();

        assert_eq!(
            pages.iter().map(|p| p.ordinal).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for p in &pages {
            assert!(shows_page(&p.bytes, p.ordinal), "page {} content", p.ordinal);
        }
    }

    #[test]
    fn single_page_document() {
        let doc = SourceDocument::load(&sample_pdf(1), "one.pdf").unwrap();
        let pages: Vec<_> = split(&doc).collect();
        assert_eq!(pages.len(), 1);
        assert!(shows_page(&pages[0].as_ref().unwrap().bytes, 1));
    }

    #[test]
    fn zero_page_document_yields_nothing() {
        let doc = SourceDocument::load(&sample_pdf(0), "empty.pdf").unwrap();
        assert_eq!(doc.page_count(), 0);
        assert_eq!(split(&doc).count(), 0);
    }

    #[test]
    fn iterator_is_lazy_and_stops_after_failure() {
        let source = FailingSource {
            inner: SourceDocument::load(&sample_pdf(5), "five.pdf").unwrap(),
            fail_at: 3,
        };
        let mut it = split(&source);

        assert_eq!(it.next().unwrap().unwrap().ordinal, 1);
        assert_eq!(it.next().unwrap().unwrap().ordinal, 2);
        let err = it.next().unwrap().unwrap_err();
        assert_eq!(err.page(), 3);
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn page_takes_over_inherited_attributes() {
        let doc = SourceDocument::load(&sample_pdf(3), "three.pdf").unwrap();
        let out = Document::load_mem(&doc.extract_page(1).unwrap()).unwrap();

        let (_, &page_id) = out.get_pages().iter().next().unwrap();
        let page = out.get_dictionary(page_id).unwrap();
        assert!(page.has(b"MediaBox"));
        let resources = match page.get(b"Resources").unwrap() {
            Object::Reference(id) => out.get_dictionary(*id).unwrap(),
            Object::Dictionary(dict) => dict,
            other => panic!("unexpected Resources {other:?}"),
        };
        assert!(resources.get(b"Font").is_ok());
    }

    #[test]
    fn page_output_holds_only_its_own_objects() {
        let big = SourceDocument::load(&sample_pdf(300), "big.pdf").unwrap();
        let from_big = big.extract_page(149).unwrap();

        assert!(shows_page(&from_big, 150));
        let out = Document::load_mem(&from_big).unwrap();
        assert!(out.objects.len() <= 8, "{} objects", out.objects.len());
    }

    #[test]
    fn large_document_splits_every_page() {
        let doc = SourceDocument::load(&sample_pdf(400), "scan.pdf").unwrap();
        let pages: Vec<SplitPage> = split(&doc).collect::<Result<_, _>>().unwrap();

        assert_eq!(pages.len(), 400);
        for n in [1, 200, 400] {
            assert!(shows_page(&pages[n - 1].bytes, n), "page {n}");
        }
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let doc = SourceDocument::load(&sample_pdf(2), "two.pdf").unwrap();
        assert!(doc.extract_page(2).is_err());
    }
}
